use crate::image::digest::{Digest, DigestError};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_NAMESPACE: &str = "library";
pub const DEFAULT_TAG: &str = "latest";

/// Wire host for Docker Hub; every other registry is addressed as named.
const DOCKER_HUB_WIRE_HOST: &str = "registry-1.docker.io";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("invalid image reference '{0}'")]
    Invalid(String),
    #[error("invalid digest in image reference: {0}")]
    Digest(#[from] DigestError),
}

/// Parsed form of an image string such as `ghcr.io/a/b:c@sha256:...`.
///
/// Either `tag` or `digest` is always set (possibly both); `registry` is
/// always non-empty. A single-segment name resolves against Docker Hub
/// with the implicit `library` namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub namespace: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<Digest>,
}

impl ImageReference {
    pub fn parse(s: &str) -> Result<Self, ReferenceError> {
        s.parse()
    }

    /// `namespace/repository`, or just `repository` when the namespace is
    /// empty. This is the `<name>` component of the distribution API path.
    pub fn repository_path(&self) -> String {
        if self.namespace.is_empty() {
            self.repository.clone()
        } else {
            format!("{}/{}", self.namespace, self.repository)
        }
    }

    /// Host to dial for distribution API requests. The canonical
    /// `docker.io` maps to `registry-1.docker.io`; all others pass through.
    pub fn wire_host(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            DOCKER_HUB_WIRE_HOST
        } else {
            &self.registry
        }
    }

    /// Tag to resolve when no digest pins the reference.
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }
}

impl FromStr for ImageReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(ReferenceError::Invalid(s.to_string()));
        }

        // The digest is split off first so a ':' inside it never competes
        // with the tag separator.
        let (rest, digest) = match s.rsplit_once('@') {
            Some((head, digest)) => (head, Some(digest.parse::<Digest>()?)),
            None => (s, None),
        };

        // The last ':' starts a tag only when nothing after it crosses a
        // path boundary; otherwise it is a registry port separator.
        let (path, tag) = match rest.rsplit_once(':') {
            Some((head, candidate)) if !candidate.is_empty() && !candidate.contains('/') => {
                (head, Some(candidate.to_string()))
            }
            _ => (rest, None),
        };
        if path.is_empty() {
            return Err(ReferenceError::Invalid(s.to_string()));
        }

        let segments: Vec<&str> = path.split('/').collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(ReferenceError::Invalid(s.to_string()));
        }

        let (registry, namespace, repository) = match segments.as_slice() {
            [repository] => (
                DEFAULT_REGISTRY.to_string(),
                DEFAULT_NAMESPACE.to_string(),
                repository.to_string(),
            ),
            [first, repository] if is_registry_host(first) => {
                (first.to_string(), String::new(), repository.to_string())
            }
            [namespace, repository] => (
                DEFAULT_REGISTRY.to_string(),
                namespace.to_string(),
                repository.to_string(),
            ),
            [registry, middle @ .., repository] => (
                registry.to_string(),
                middle.join("/"),
                repository.to_string(),
            ),
            [] => unreachable!("split always yields at least one segment"),
        };

        let tag = match (tag, &digest) {
            (Some(tag), _) => Some(tag),
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (None, Some(_)) => None,
        };

        Ok(Self {
            registry,
            namespace,
            repository,
            tag,
            digest,
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository_path())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// A leading path segment names a registry when it looks like a host:
/// it contains a dot or a port, or is the literal `localhost`.
fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}
