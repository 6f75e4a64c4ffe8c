
use crate::engine::models::{
    Container, ContainerDetails, CreateContainerBody, EndpointSettings, EngineVersion, ImageInfo,
    PullAuth,
};
use crate::engine::{Engine, EngineError};
use crate::registry::{CredentialStore, RegistryClient};
use crate::selector::Selector;
use crate::system::signals::shutdown_channel;
use crate::update::engine::{UpdateEngine, UpdateOptions};
use crate::update::events::{EventLevel, EventSink};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub(crate) const NEW_ID: &str = "newc0ffee0001";

/// In-memory engine recording every call, with injectable failures.
#[derive(Default)]
pub(crate) struct StubEngine {
    calls: Mutex<Vec<String>>,
    containers: Vec<Container>,
    details: HashMap<String, ContainerDetails>,
    images: Mutex<HashMap<String, ImageInfo>>,
    fail: HashSet<String>,
}

impl StubEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_container(mut self, container: Container, details: ContainerDetails) -> Self {
        self.details.insert(container.id.clone(), details);
        self.containers.push(container);
        self
    }

    pub(crate) fn with_image(self, name: &str, info: ImageInfo) -> Self {
        self.images.lock().unwrap().insert(name.to_string(), info);
        self
    }

    /// Make one operation fail: `"pull"`, `"stop"`, `"remove:<id>"`,
    /// `"create"`, `"start:<id>"`.
    pub(crate) fn fail_on(mut self, op: &str) -> Self {
        self.fail.insert(op.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn maybe_fail(&self, op: &str) -> Result<(), EngineError> {
        if self.fail.contains(op) {
            return Err(EngineError::Api {
                status: 500,
                message: format!("stub failure on {op}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Engine for StubEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn version(&self) -> Result<EngineVersion, EngineError> {
        Ok(serde_json::from_value(serde_json::json!({
            "Version": "0.0-stub",
            "ApiVersion": "1.46"
        }))
        .unwrap())
    }

    async fn list_containers(&self, _include_stopped: bool) -> Result<Vec<Container>, EngineError> {
        self.record("list".into());
        Ok(self.containers.clone())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError> {
        self.record(format!("inspect_container:{id}"));
        self.details.get(id).cloned().ok_or(EngineError::Api {
            status: 404,
            message: format!("no such container {id}"),
        })
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageInfo, EngineError> {
        self.record(format!("inspect_image:{image}"));
        self.images
            .lock()
            .unwrap()
            .get(image)
            .cloned()
            .ok_or(EngineError::Api {
                status: 404,
                message: format!("no such image {image}"),
            })
    }

    async fn pull_image(&self, image: &str, _auth: Option<&PullAuth>) -> Result<(), EngineError> {
        self.record(format!("pull:{image}"));
        self.maybe_fail("pull")
    }

    async fn stop_container(
        &self,
        id: &str,
        _timeout_seconds: u64,
        _signal: Option<&str>,
    ) -> Result<(), EngineError> {
        self.record(format!("stop:{id}"));
        self.maybe_fail("stop")
    }

    async fn remove_container(&self, id: &str, _remove_volumes: bool) -> Result<(), EngineError> {
        self.record(format!("remove:{id}"));
        self.maybe_fail(&format!("remove:{id}"))
    }

    async fn create_container(
        &self,
        name: &str,
        _body: &CreateContainerBody,
    ) -> Result<String, EngineError> {
        self.record(format!("create:{name}"));
        self.maybe_fail("create")?;
        Ok(NEW_ID.to_string())
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.record(format!("start:{id}"));
        self.maybe_fail(&format!("start:{id}"))
    }

    async fn remove_image(&self, image: &str) -> Result<(), EngineError> {
        self.record(format!("remove_image:{image}"));
        Ok(())
    }

    async fn connect_network(
        &self,
        network_id: &str,
        container_id: &str,
        endpoint: Option<&EndpointSettings>,
    ) -> Result<(), EngineError> {
        let aliases = endpoint
            .and_then(|e| e.aliases.clone())
            .unwrap_or_default()
            .join(",");
        self.record(format!("connect:{network_id}:{container_id}:aliases={aliases}"));
        Ok(())
    }

    async fn disconnect_network(
        &self,
        network_id: &str,
        container_id: &str,
        _force: bool,
    ) -> Result<(), EngineError> {
        self.record(format!("disconnect:{network_id}:{container_id}"));
        Ok(())
    }
}

pub(crate) fn digest(fill: char) -> String {
    format!("sha256:{}", fill.to_string().repeat(64))
}

pub(crate) fn container(id: &str, name: &str, image: &str) -> Container {
    Container {
        id: id.to_string(),
        name: name.to_string(),
        image: image.to_string(),
        image_id: "sha256:0ldc0ntent".to_string(),
        state: "running".to_string(),
        status: "Up 3 days".to_string(),
        labels: HashMap::new(),
        created: 0,
    }
}

pub(crate) fn details(id: &str, name: &str, image: &str, running: bool) -> ContainerDetails {
    serde_json::from_value(serde_json::json!({
        "Id": id,
        "Name": format!("/{name}"),
        "Image": "sha256:0ldc0ntent",
        "Config": {
            "Hostname": name,
            "Image": image,
            "Env": ["A=1"],
            "Labels": {}
        },
        "State": {"Status": if running { "running" } else { "exited" }, "Running": running},
        "HostConfig": {
            "NetworkMode": "bridge",
            "RestartPolicy": {"Name": "always"}
        },
        "NetworkSettings": {
            "Networks": {
                "front": {
                    "NetworkID": "netid1",
                    "Aliases": [name, &id[..12.min(id.len())]]
                }
            }
        }
    }))
    .unwrap()
}

pub(crate) fn image_info(image: &str, manifest_digest: &str) -> ImageInfo {
    // Drop the tag but keep any registry port.
    let repo = match image.rsplit_once(':') {
        Some((head, tail)) if !tail.contains('/') => head,
        _ => image,
    };
    serde_json::from_value(serde_json::json!({
        "Id": "sha256:0ldc0ntent",
        "RepoTags": [image],
        "RepoDigests": [format!("{repo}@{manifest_digest}")],
        "Created": "2026-01-01T00:00:00Z",
        "Size": 42
    }))
    .unwrap()
}

pub(crate) fn build_update_engine(
    stub: Arc<StubEngine>,
    registry: RegistryClient,
    selector: Selector,
    options: UpdateOptions,
) -> UpdateEngine {
    let (_trigger, shutdown) = shutdown_channel();
    UpdateEngine::new(
        stub,
        Arc::new(registry),
        Arc::new(CredentialStore::new()),
        selector,
        options,
        Arc::new(EventSink::new(Vec::new(), EventLevel::Debug, false)),
        shutdown,
    )
}

pub(crate) fn plain_registry() -> RegistryClient {
    RegistryClient::new(Arc::new(CredentialStore::new()))
        .unwrap()
        .insecure()
}
