use crate::engine::http::{HttpResponse, UnixTransport};
use crate::engine::models::{
    Container, ContainerDetails, ContainerSummary, CreateContainerBody, CreatedContainer,
    EndpointSettings, EngineVersion, ImageInfo, PullAuth,
};
use crate::engine::{Engine, EngineError};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::form_urlencoded;

pub const DEFAULT_HOST: &str = "unix:///var/run/docker.sock";

/// Client for the engine's HTTP API over its local stream socket.
///
/// The API version is negotiated once via an un-prefixed `GET /version`
/// and cached; every subsequent call is prefixed `/v<api_version>/...`.
pub struct DockerEngine {
    transport: UnixTransport,
    configured_api_version: Option<String>,
    api_version: OnceCell<String>,
}

impl DockerEngine {
    pub fn new(host: &str, api_version: Option<String>) -> Result<Self, EngineError> {
        let path = host
            .strip_prefix("unix://")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| EngineError::UnsupportedHost(host.to_string()))?;
        Ok(Self {
            transport: UnixTransport::new(path),
            configured_api_version: api_version,
            api_version: OnceCell::new(),
        })
    }

    async fn api_version(&self) -> Result<&str, EngineError> {
        if let Some(version) = &self.configured_api_version {
            return Ok(version);
        }
        self.api_version
            .get_or_try_init(|| async {
                let version = self.fetch_version().await?;
                debug!(api_version = version.api_version, "Negotiated engine API version");
                Ok(version.api_version)
            })
            .await
            .map(String::as_str)
    }

    async fn fetch_version(&self) -> Result<EngineVersion, EngineError> {
        let response = self.transport.request("GET", "/version", &[], None).await?;
        Ok(serde_json::from_slice(&expect_success(response)?.body)?)
    }

    async fn versioned(&self, path: &str) -> Result<String, EngineError> {
        Ok(format!("/v{}{}", self.api_version().await?, path))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, EngineError> {
        let path = self.versioned(path).await?;
        let response = self.transport.request("GET", &path, &[], None).await?;
        Ok(serde_json::from_slice(&expect_success(response)?.body)?)
    }

    async fn post<B: Serialize + Sync>(
        &self,
        path: &str,
        body: Option<&B>,
        extra_headers: &[(&str, String)],
    ) -> Result<HttpResponse, EngineError> {
        let path = self.versioned(path).await?;
        let payload = body.map(serde_json::to_vec).transpose()?;
        let mut headers = extra_headers.to_vec();
        if payload.is_some() {
            headers.push(("Content-Type", "application/json".to_string()));
        }
        let response = self
            .transport
            .request("POST", &path, &headers, payload.as_deref())
            .await?;
        expect_success(response)
    }

    async fn delete(&self, path: &str) -> Result<HttpResponse, EngineError> {
        let path = self.versioned(path).await?;
        let response = self.transport.request("DELETE", &path, &[], None).await?;
        expect_success(response)
    }
}

fn expect_success(response: HttpResponse) -> Result<HttpResponse, EngineError> {
    // 304 means the container is already in the requested state.
    if response.is_success() || response.status == 304 {
        return Ok(response);
    }
    #[derive(serde::Deserialize)]
    struct ApiMessage {
        message: String,
    }
    let message = serde_json::from_slice::<ApiMessage>(&response.body)
        .map(|m| m.message)
        .unwrap_or_else(|_| response.body_text());
    Err(EngineError::Api {
        status: response.status,
        message,
    })
}

fn query(pairs: &[(&str, &str)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, value) in pairs {
        serializer.append_pair(name, value);
    }
    serializer.finish()
}

/// Pull progress is streamed as one JSON record per line; failures are
/// reported in-band with an `error` field rather than a status code.
fn scan_pull_stream(body: &[u8]) -> Result<(), EngineError> {
    for line in body.split(|b| *b == b'\n') {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(record) = serde_json::from_str::<serde_json::Value>(line)
            && let Some(error) = record.get("error").and_then(|e| e.as_str())
        {
            return Err(EngineError::Pull(error.to_string()));
        }
    }
    Ok(())
}

#[async_trait]
impl Engine for DockerEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        let response = self.transport.request("GET", "/_ping", &[], None).await?;
        expect_success(response).map(|_| ())
    }

    async fn version(&self) -> Result<EngineVersion, EngineError> {
        self.fetch_version().await
    }

    async fn list_containers(&self, include_stopped: bool) -> Result<Vec<Container>, EngineError> {
        let all = if include_stopped { "true" } else { "false" };
        let summaries: Vec<ContainerSummary> = self
            .get_json(&format!("/containers/json?{}", query(&[("all", all)])))
            .await?;
        Ok(summaries.into_iter().map(Container::from).collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError> {
        self.get_json(&format!("/containers/{id}/json")).await
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageInfo, EngineError> {
        self.get_json(&format!("/images/{image}/json")).await
    }

    async fn pull_image(&self, image: &str, auth: Option<&PullAuth>) -> Result<(), EngineError> {
        let mut headers = Vec::new();
        if let Some(auth) = auth {
            let encoded = general_purpose::URL_SAFE.encode(serde_json::to_vec(auth)?);
            headers.push(("X-Registry-Auth", encoded));
        }
        let path = self
            .versioned(&format!(
                "/images/create?{}",
                query(&[("fromImage", image)])
            ))
            .await?;
        let response = self.transport.request("POST", &path, &headers, None).await?;
        let response = expect_success(response)?;
        scan_pull_stream(&response.body)
    }

    async fn stop_container(
        &self,
        id: &str,
        timeout_seconds: u64,
        signal: Option<&str>,
    ) -> Result<(), EngineError> {
        let timeout = timeout_seconds.to_string();
        let mut pairs = vec![("t", timeout.as_str())];
        if let Some(signal) = signal {
            pairs.push(("signal", signal));
        }
        self.post::<()>(
            &format!("/containers/{id}/stop?{}", query(&pairs)),
            None,
            &[],
        )
        .await
        .map(|_| ())
    }

    async fn remove_container(&self, id: &str, remove_volumes: bool) -> Result<(), EngineError> {
        let v = if remove_volumes { "true" } else { "false" };
        self.delete(&format!("/containers/{id}?{}", query(&[("v", v)])))
            .await
            .map(|_| ())
    }

    async fn create_container(
        &self,
        name: &str,
        body: &CreateContainerBody,
    ) -> Result<String, EngineError> {
        let response = self
            .post(
                &format!("/containers/create?{}", query(&[("name", name)])),
                Some(body),
                &[],
            )
            .await?;
        let created: CreatedContainer = serde_json::from_slice(&response.body)?;
        for warning in &created.warnings {
            warn!(container = name, warning, "Engine warned during create");
        }
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.post::<()>(&format!("/containers/{id}/start"), None, &[])
            .await
            .map(|_| ())
    }

    async fn remove_image(&self, image: &str) -> Result<(), EngineError> {
        self.delete(&format!("/images/{image}")).await.map(|_| ())
    }

    async fn connect_network(
        &self,
        network_id: &str,
        container_id: &str,
        endpoint: Option<&EndpointSettings>,
    ) -> Result<(), EngineError> {
        #[derive(Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct ConnectBody<'a> {
            container: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            endpoint_config: Option<&'a EndpointSettings>,
        }
        self.post(
            &format!("/networks/{network_id}/connect"),
            Some(&ConnectBody {
                container: container_id,
                endpoint_config: endpoint,
            }),
            &[],
        )
        .await
        .map(|_| ())
    }

    async fn disconnect_network(
        &self,
        network_id: &str,
        container_id: &str,
        force: bool,
    ) -> Result<(), EngineError> {
        #[derive(Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct DisconnectBody<'a> {
            container: &'a str,
            force: bool,
        }
        self.post(
            &format!("/networks/{network_id}/disconnect"),
            Some(&DisconnectBody {
                container: container_id,
                force,
            }),
            &[],
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;
    use tokio::sync::Mutex;

    /// A scripted engine: each accepted connection records the request
    /// head and answers with the next canned response.
    struct FakeDaemon {
        socket: std::path::PathBuf,
        requests: Arc<Mutex<Vec<String>>>,
        _dir: tempfile::TempDir,
    }

    impl FakeDaemon {
        async fn start(responses: Vec<String>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let socket = dir.path().join("engine.sock");
            let listener = UnixListener::bind(&socket).unwrap();
            let requests = Arc::new(Mutex::new(Vec::new()));
            let seen = requests.clone();
            tokio::spawn(async move {
                for response in responses {
                    let (mut stream, _) = match listener.accept().await {
                        Ok(accepted) => accepted,
                        Err(_) => return,
                    };
                    let mut buffer = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buffer.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut chunk).await {
                            Ok(0) => break,
                            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                            Err(_) => return,
                        }
                    }
                    let head = String::from_utf8_lossy(&buffer);
                    if let Some(length) = head.lines().find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().to_string())
                    }) {
                        let declared: usize = length.parse().unwrap();
                        let body_start = buffer
                            .windows(4)
                            .position(|w| w == b"\r\n\r\n")
                            .unwrap()
                            + 4;
                        let mut have = buffer.len() - body_start;
                        while have < declared {
                            let n = stream.read(&mut chunk).await.unwrap();
                            if n == 0 {
                                break;
                            }
                            have += n;
                        }
                    }
                    let first_line = head.lines().next().unwrap_or_default().to_string();
                    seen.lock().await.push(first_line);
                    stream.write_all(response.as_bytes()).await.unwrap();
                    stream.shutdown().await.unwrap();
                }
            });
            Self {
                socket,
                requests,
                _dir: dir,
            }
        }

        fn host(&self) -> String {
            format!("unix://{}", self.socket.display())
        }

        async fn requests(&self) -> Vec<String> {
            self.requests.lock().await.clone()
        }
    }

    fn http_json(status: u16, reason: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
    }

    const VERSION_BODY: &str = r#"{"Version":"27.0.1","ApiVersion":"1.46"}"#;

    #[tokio::test]
    async fn test_negotiates_api_version_before_first_call() {
        let daemon = FakeDaemon::start(vec![
            http_json(200, "OK", VERSION_BODY),
            http_json(200, "OK", "[]"),
        ])
        .await;
        let engine = DockerEngine::new(&daemon.host(), None).unwrap();

        let containers = engine.list_containers(false).await.unwrap();
        assert!(containers.is_empty());

        let requests = daemon.requests().await;
        assert_eq!(requests[0], "GET /version HTTP/1.1");
        assert_eq!(requests[1], "GET /v1.46/containers/json?all=false HTTP/1.1");
    }

    #[tokio::test]
    async fn test_configured_api_version_skips_negotiation() {
        let daemon = FakeDaemon::start(vec![http_json(200, "OK", "[]")]).await;
        let engine = DockerEngine::new(&daemon.host(), Some("1.41".to_string())).unwrap();

        engine.list_containers(true).await.unwrap();
        let requests = daemon.requests().await;
        assert_eq!(requests[0], "GET /v1.41/containers/json?all=true HTTP/1.1");
    }

    #[tokio::test]
    async fn test_non_2xx_surfaces_status_and_message() {
        let daemon = FakeDaemon::start(vec![http_json(
            404,
            "Not Found",
            r#"{"message":"No such container: web"}"#,
        )])
        .await;
        let engine = DockerEngine::new(&daemon.host(), Some("1.46".to_string())).unwrap();

        let err = engine.inspect_container("web").await.unwrap_err();
        match err {
            EngineError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "No such container: web");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_posts_body_and_returns_id() {
        let daemon = FakeDaemon::start(vec![http_json(
            201,
            "Created",
            r#"{"Id":"deadbeef","Warnings":[]}"#,
        )])
        .await;
        let engine = DockerEngine::new(&daemon.host(), Some("1.46".to_string())).unwrap();

        let body = CreateContainerBody {
            image: "nginx:1.22".to_string(),
            ..CreateContainerBody::default()
        };
        let id = engine.create_container("web", &body).await.unwrap();
        assert_eq!(id, "deadbeef");
        let requests = daemon.requests().await;
        assert_eq!(requests[0], "POST /v1.46/containers/create?name=web HTTP/1.1");
    }

    #[tokio::test]
    async fn test_pull_detects_in_band_error() {
        let progress = concat!(
            "{\"status\":\"Pulling from library/nginx\"}\n",
            "{\"error\":\"manifest unknown\"}\n",
        );
        let daemon =
            FakeDaemon::start(vec![http_json(200, "OK", progress)]).await;
        let engine = DockerEngine::new(&daemon.host(), Some("1.46".to_string())).unwrap();

        let err = engine.pull_image("nginx:nope", None).await.unwrap_err();
        assert!(matches!(err, EngineError::Pull(message) if message == "manifest unknown"));
    }

    #[tokio::test]
    async fn test_unsupported_host_is_rejected() {
        assert!(matches!(
            DockerEngine::new("tcp://127.0.0.1:2375", None),
            Err(EngineError::UnsupportedHost(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_socket_is_unavailable() {
        let engine = DockerEngine::new("unix:///nonexistent/engine.sock", Some("1.46".into())).unwrap();
        assert!(matches!(
            engine.ping().await,
            Err(EngineError::Unavailable { .. })
        ));
    }
}
