//! Serde models for the engine API payloads the update flow touches.
//!
//! Field names follow the engine's wire casing; empty collections are
//! omitted on serialization so a recreated container only carries the
//! configuration the original actually had.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EngineVersion {
    #[serde(default)]
    pub version: String,
    pub api_version: String,
}

/// One row of the container listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub image: String,
    #[serde(rename = "ImageID", default)]
    pub image_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub created: i64,
}

/// Listing view of a container, with the engine's leading-slash name
/// convention already stripped.
#[derive(Debug, Clone)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub image: String,
    pub image_id: String,
    pub state: String,
    pub status: String,
    pub labels: HashMap<String, String>,
    pub created: i64,
}

impl From<ContainerSummary> for Container {
    fn from(summary: ContainerSummary) -> Self {
        let name = summary
            .names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();
        Self {
            id: summary.id,
            name,
            image: summary.image,
            image_id: summary.image_id,
            state: summary.state,
            status: summary.status,
            labels: summary.labels,
            created: summary.created,
        }
    }
}

impl Container {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Inspect view: the full surface required to recreate a container.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerDetails {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub config: ContainerConfig,
    #[serde(default)]
    pub state: ContainerState,
    #[serde(default)]
    pub host_config: HostConfig,
    #[serde(default)]
    pub network_settings: NetworkSettings,
}

impl ContainerDetails {
    pub fn name(&self) -> &str {
        self.name.trim_start_matches('/')
    }

    /// First 12 characters of the id, the engine's short-id alias form.
    pub fn short_id(&self) -> &str {
        let end = self.id.len().min(12);
        &self.id[..end]
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub env: Option<Vec<String>>,
    #[serde(default)]
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
    /// Keyed `port/proto`, values are empty objects on the wire.
    #[serde(default)]
    pub exposed_ports: Option<BTreeMap<String, serde_json::Value>>,
    /// Anonymous volume mount points, keyed by path.
    #[serde(default)]
    pub volumes: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub running: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binds: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_bindings: Option<HashMap<String, Option<Vec<PortBinding>>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_remove: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub publish_all_ports: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap_add: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap_drop: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortBinding {
    #[serde(rename = "HostIp", default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    #[serde(rename = "HostPort", default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestartPolicy {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub maximum_retry_count: i64,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    #[serde(default)]
    pub networks: HashMap<String, EndpointSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointSettings {
    #[serde(rename = "NetworkID", default, skip_serializing_if = "String::is_empty")]
    pub network_id: String,
    #[serde(rename = "IPAddress", default, skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
    #[serde(rename = "Gateway", default, skip_serializing_if = "String::is_empty")]
    pub gateway: String,
    #[serde(rename = "IPPrefixLen", default, skip_serializing_if = "is_zero")]
    pub ip_prefix_len: i64,
    #[serde(rename = "Aliases", default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
}

/// Body for container creation, reproducing an inspected configuration
/// with only the image substituted.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateContainerBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposed_ports: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_config: Option<HostConfig>,
}

impl CreateContainerBody {
    /// Preserve `details`' runtime configuration, swapping in `image`.
    pub fn from_details(details: &ContainerDetails, image: &str) -> Self {
        let config = &details.config;
        Self {
            hostname: non_empty(config.hostname.clone()),
            user: non_empty(config.user.clone()),
            working_dir: non_empty(config.working_dir.clone()),
            image: image.to_string(),
            env: non_empty_vec(config.env.clone()),
            cmd: non_empty_vec(config.cmd.clone()),
            entrypoint: non_empty_vec(config.entrypoint.clone()),
            labels: config.labels.clone().filter(|l| !l.is_empty()),
            exposed_ports: config.exposed_ports.clone().filter(|p| !p.is_empty()),
            volumes: config.volumes.clone().filter(|v| !v.is_empty()),
            host_config: Some(details.host_config.clone()),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn non_empty_vec(value: Option<Vec<String>>) -> Option<Vec<String>> {
    value.filter(|v| !v.is_empty())
}

/// Payload for the engine's `X-Registry-Auth` pull header.
#[derive(Debug, Clone, Serialize)]
pub struct PullAuth {
    pub username: String,
    pub password: String,
    #[serde(rename = "serveraddress")]
    pub server_address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageInfo {
    pub id: String,
    #[serde(default)]
    pub repo_tags: Vec<String>,
    #[serde(default)]
    pub repo_digests: Vec<String>,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub size: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreatedContainer {
    pub id: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details_fixture() -> ContainerDetails {
        serde_json::from_value(serde_json::json!({
            "Id": "0123456789abcdef",
            "Name": "/web",
            "Image": "sha256:aaa",
            "Config": {
                "Hostname": "web",
                "User": "",
                "WorkingDir": "/srv",
                "Image": "nginx:1.21",
                "Env": ["A=1", "QUOTED=he said \"hi\"\n"],
                "Cmd": ["nginx", "-g", "daemon off;"],
                "Labels": {"app": "web"},
                "ExposedPorts": {"80/tcp": {}},
                "Volumes": {"/data": {}}
            },
            "State": {"Status": "running", "Running": true},
            "HostConfig": {
                "Binds": ["/host:/data"],
                "PortBindings": {"80/tcp": [{"HostIp": "0.0.0.0", "HostPort": "8080"}]},
                "RestartPolicy": {"Name": "unless-stopped", "MaximumRetryCount": 0},
                "NetworkMode": "bridge",
                "Privileged": false,
                "AutoRemove": false,
                "PublishAllPorts": false
            },
            "NetworkSettings": {
                "Networks": {
                    "front": {
                        "NetworkID": "net1",
                        "IPAddress": "172.18.0.2",
                        "Gateway": "172.18.0.1",
                        "IPPrefixLen": 16,
                        "Aliases": ["web", "0123456789ab"]
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_create_body_preserves_config_and_swaps_image() {
        let details = details_fixture();
        let body = CreateContainerBody::from_details(&details, "nginx:1.22");
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["Image"], "nginx:1.22");
        assert_eq!(json["Hostname"], "web");
        assert_eq!(json["WorkingDir"], "/srv");
        assert_eq!(json["Env"][0], "A=1");
        assert_eq!(json["HostConfig"]["Binds"][0], "/host:/data");
        assert_eq!(
            json["HostConfig"]["PortBindings"]["80/tcp"][0]["HostPort"],
            "8080"
        );
        assert_eq!(json["HostConfig"]["RestartPolicy"]["Name"], "unless-stopped");
        // The empty user is omitted entirely.
        assert!(json.get("User").is_none());
    }

    #[test]
    fn test_create_body_escapes_strings() {
        let details = details_fixture();
        let body = CreateContainerBody::from_details(&details, "nginx:1.22");
        let raw = serde_json::to_string(&body).unwrap();
        assert!(raw.contains(r#"he said \"hi\"\n"#));
    }

    #[test]
    fn test_container_name_strips_leading_slash() {
        let summary: ContainerSummary = serde_json::from_value(serde_json::json!({
            "Id": "abc",
            "Names": ["/web"],
            "Image": "nginx",
            "ImageID": "sha256:aaa",
            "State": "running",
            "Status": "Up 2 hours",
            "Labels": {},
            "Created": 1
        }))
        .unwrap();
        let container = Container::from(summary);
        assert_eq!(container.name, "web");
        assert!(container.is_running());
    }

    #[test]
    fn test_short_id_truncates_to_twelve() {
        let details = details_fixture();
        assert_eq!(details.short_id(), "0123456789ab");
    }
}
