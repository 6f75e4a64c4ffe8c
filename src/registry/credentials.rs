use crate::config::secret_string::SecretString;
use crate::engine::PullAuth;
use base64::Engine;
use base64::engine::general_purpose;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Per-registry login, looked up by exact registry host.
#[derive(Debug, Clone)]
pub struct Credential {
    pub registry: String,
    pub username: String,
    pub password: SecretString,
}

impl Credential {
    /// `base64(user:pass)` for the `Authorization: Basic` header.
    pub fn basic_auth_b64(&self) -> String {
        general_purpose::STANDARD.encode(format!(
            "{}:{}",
            self.username,
            self.password.expose_secret()
        ))
    }

    /// Payload for the engine's `X-Registry-Auth` pull header.
    pub fn pull_auth(&self) -> PullAuth {
        PullAuth {
            username: self.username.clone(),
            password: self.password.expose_secret().to_string(),
            server_address: self.registry.clone(),
        }
    }
}

/// The engine user config file: `{"auths": {"<registry>": {"auth": ...}}}`.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    auths: HashMap<String, ConfigAuthEntry>,
}

#[derive(Debug, Deserialize)]
struct ConfigAuthEntry {
    #[serde(default)]
    auth: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// Read-only after startup; loaded once from `~/.docker/config.json` and
/// optionally augmented with explicit entries from environment or CLI.
#[derive(Debug, Default)]
pub struct CredentialStore {
    entries: HashMap<String, Credential>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from the user-level engine config. A missing, unreadable, or
    /// malformed file yields an empty store, never an error.
    pub fn load_default() -> Self {
        match default_config_path() {
            Some(path) => Self::load_from_path(&path),
            None => Self::new(),
        }
    }

    pub fn load_from_path(path: &Path) -> Self {
        let mut store = Self::new();
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "No engine config file loaded");
                return store;
            }
        };
        let parsed: ConfigFile = match serde_json::from_slice(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Ignoring malformed engine config file");
                return store;
            }
        };
        for (registry, entry) in parsed.auths {
            let registry = normalize_registry_key(&registry);
            match decode_entry(&registry, &entry) {
                Some(credential) => {
                    debug!(registry, "Loaded registry credential");
                    store.entries.insert(registry, credential);
                }
                None => {
                    warn!(registry, "Skipping undecodable credential entry");
                }
            }
        }
        store
    }

    pub fn add(&mut self, registry: &str, username: &str, password: &str) {
        let registry = normalize_registry_key(registry);
        self.entries.insert(
            registry.clone(),
            Credential {
                registry,
                username: username.to_string(),
                password: SecretString::new(password),
            },
        );
    }

    /// Exact-host lookup; a missing entry means anonymous.
    pub fn lookup(&self, registry: &str) -> Option<&Credential> {
        self.entries.get(&normalize_registry_key(registry))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".docker").join("config.json"))
}

/// Config files historically key Docker Hub by its index URL; keys are
/// reduced to the bare host so lookups by parsed registry succeed.
fn normalize_registry_key(key: &str) -> String {
    let host = key
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = host.split('/').next().unwrap_or(host);
    match host {
        "index.docker.io" | "registry-1.docker.io" => "docker.io".to_string(),
        other => other.to_string(),
    }
}

fn decode_entry(registry: &str, entry: &ConfigAuthEntry) -> Option<Credential> {
    if !entry.username.is_empty() && !entry.password.is_empty() {
        return Some(Credential {
            registry: registry.to_string(),
            username: entry.username.clone(),
            password: SecretString::new(entry.password.clone()),
        });
    }
    if entry.auth.is_empty() {
        return None;
    }
    let decoded = general_purpose::STANDARD.decode(entry.auth.as_bytes()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(Credential {
        registry: registry.to_string(),
        username: username.to_string(),
        password: SecretString::new(password),
    })
}
