pub mod auth;
pub mod client;
pub mod credentials;

pub use auth::{AuthChallenge, TokenCache, TokenGrant};
pub use client::{CheckRequest, RegistryClient, UpdateCheck};
pub use credentials::{Credential, CredentialStore};

use crate::retry::Retryable;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry authentication failed for {registry}")]
    AuthenticationFailed { registry: String },
    #[error("manifest fetch failed with HTTP {status} for {url}")]
    ManifestFetchFailed { status: u16, url: String },
    #[error("registry answered 200 without a Docker-Content-Digest header")]
    DigestNotFound,
    #[error("unusable WWW-Authenticate challenge: {0}")]
    Challenge(String),
    #[error("token endpoint response was unusable: {0}")]
    Token(String),
    #[error("registry transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Reference(#[from] crate::image::ReferenceError),
}

impl Retryable for RegistryError {
    fn is_transient(&self) -> bool {
        match self {
            // 5xx from the registry is worth another attempt; 4xx is not.
            Self::ManifestFetchFailed { status, .. } => *status >= 500,
            Self::Transport(err) => {
                err.is_timeout() || err.is_connect() || (err.is_request() && !err.is_builder())
            }
            _ => false,
        }
    }
}
