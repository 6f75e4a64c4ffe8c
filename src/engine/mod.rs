pub mod client;
pub mod http;
pub mod models;

pub use client::DockerEngine;
pub use models::{
    Container, ContainerDetails, CreateContainerBody, EndpointSettings, EngineVersion, ImageInfo,
    PullAuth,
};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot connect to container engine socket {path}: {message}")]
    Unavailable { path: String, message: String },
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed engine response: {0}")]
    Protocol(String),
    #[error("engine returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("image pull failed: {0}")]
    Pull(String),
    #[error("unsupported engine host '{0}': only unix:// stream sockets are supported")]
    UnsupportedHost(String),
    #[error("failed to decode engine payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl EngineError {
    /// Status code of an API-level failure, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Operations the update engine needs from a container engine.
///
/// The production implementation is [`DockerEngine`] over the local stream
/// socket; tests substitute an in-memory recording stub.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn ping(&self) -> Result<(), EngineError>;

    async fn version(&self) -> Result<EngineVersion, EngineError>;

    async fn list_containers(&self, include_stopped: bool) -> Result<Vec<Container>, EngineError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError>;

    async fn inspect_image(&self, image: &str) -> Result<ImageInfo, EngineError>;

    async fn pull_image(&self, image: &str, auth: Option<&PullAuth>) -> Result<(), EngineError>;

    async fn stop_container(
        &self,
        id: &str,
        timeout_seconds: u64,
        signal: Option<&str>,
    ) -> Result<(), EngineError>;

    async fn remove_container(&self, id: &str, remove_volumes: bool) -> Result<(), EngineError>;

    async fn create_container(
        &self,
        name: &str,
        body: &CreateContainerBody,
    ) -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    async fn remove_image(&self, image: &str) -> Result<(), EngineError>;

    async fn connect_network(
        &self,
        network_id: &str,
        container_id: &str,
        endpoint: Option<&EndpointSettings>,
    ) -> Result<(), EngineError>;

    async fn disconnect_network(
        &self,
        network_id: &str,
        container_id: &str,
        force: bool,
    ) -> Result<(), EngineError>;
}
