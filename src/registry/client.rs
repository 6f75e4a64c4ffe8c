use crate::image::ImageReference;
use crate::image::reference::DEFAULT_REGISTRY;
use crate::registry::auth::{AuthChallenge, TokenCache, TokenGrant, TokenKey};
use crate::registry::credentials::CredentialStore;
use crate::registry::RegistryError;
use crate::retry::{BackoffPolicy, retry_transient};
use futures::StreamExt;
use futures::stream;
use reqwest::header::{ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Method, Response, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// All manifest flavors we are willing to compare digests for.
const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

const DIGEST_HEADER: &str = "Docker-Content-Digest";

/// Docker Hub's token endpoint is fixed; asking it to tell us via a 401
/// round trip would only add latency to every scan.
const DOCKER_HUB_REALM: &str = "https://auth.docker.io/token";
const DOCKER_HUB_SERVICE: &str = "registry.docker.io";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub image: String,
    pub current_digest: String,
}

#[derive(Debug, Clone)]
pub struct UpdateCheck {
    pub has_update: bool,
    pub current: String,
    pub latest: Option<String>,
    pub message: Option<&'static str>,
}

impl UpdateCheck {
    fn skipped(current: &str, message: &'static str) -> Self {
        Self {
            has_update: false,
            current: current.to_string(),
            latest: None,
            message: Some(message),
        }
    }
}

/// OCI-distribution v2 client for manifest digest lookups.
///
/// Owns the token cache; reqwest handles gzip decompression and bounded
/// redirects, everything protocol-specific lives here.
pub struct RegistryClient {
    http: reqwest::Client,
    credentials: Arc<CredentialStore>,
    tokens: TokenCache,
    backoff: BackoffPolicy,
    insecure: bool,
}

impl RegistryClient {
    pub fn new(credentials: Arc<CredentialStore>) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .gzip(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            credentials,
            tokens: TokenCache::new(),
            backoff: BackoffPolicy::default(),
            insecure: false,
        })
    }

    /// Speak plain http to the registry; only for local test registries.
    pub fn insecure(mut self) -> Self {
        self.insecure = true;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    fn scheme(&self) -> &'static str {
        if self.insecure { "http" } else { "https" }
    }

    fn manifest_url(&self, reference: &ImageReference) -> String {
        format!(
            "{}://{}/v2/{}/manifests/{}",
            self.scheme(),
            reference.wire_host(),
            reference.repository_path(),
            reference.tag_or_default(),
        )
    }

    fn token_key(reference: &ImageReference) -> TokenKey {
        TokenKey {
            registry: reference.registry.clone(),
            repository: reference.repository_path(),
            scope: format!("repository:{}:pull", reference.repository_path()),
        }
    }

    /// Manifest digest for `(registry, repository, tag)` via `HEAD`, so
    /// the manifest bytes themselves are never transferred.
    pub async fn head_manifest_digest(
        &self,
        reference: &ImageReference,
    ) -> Result<String, RegistryError> {
        retry_transient(&self.backoff, "head manifest", || async move {
            let response = self.manifest_request(Method::HEAD, reference).await?;
            response
                .headers()
                .get(DIGEST_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
                .ok_or(RegistryError::DigestNotFound)
        })
        .await
    }

    /// Manifest bytes via `GET`; gzip content-encoding is decompressed
    /// transparently by the transport.
    pub async fn get_manifest(
        &self,
        reference: &ImageReference,
    ) -> Result<Vec<u8>, RegistryError> {
        retry_transient(&self.backoff, "get manifest", || async move {
            let response = self.manifest_request(Method::GET, reference).await?;
            Ok(response.bytes().await?.to_vec())
        })
        .await
    }

    /// One authenticated manifest request, including the 401 → challenge
    /// → token → retry-once dance.
    async fn manifest_request(
        &self,
        method: Method,
        reference: &ImageReference,
    ) -> Result<Response, RegistryError> {
        let url = self.manifest_url(reference);
        let key = Self::token_key(reference);

        // Docker Hub gets its token pre-emptively; other registries are
        // tried with whatever we have and told what to do via 401.
        let mut bearer = self.tokens.get(&key).await;
        if bearer.is_none() && reference.registry == DEFAULT_REGISTRY && !self.insecure {
            let challenge = AuthChallenge {
                realm: DOCKER_HUB_REALM.to_string(),
                service: DOCKER_HUB_SERVICE.to_string(),
                scope: None,
            };
            bearer = Some(self.fetch_token(&key, &challenge).await?);
        }

        let response = self
            .send_manifest(method.clone(), &url, &key, bearer.as_deref())
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::accept_manifest_response(response, &url);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| RegistryError::Challenge("401 without WWW-Authenticate".into()))
            .and_then(AuthChallenge::parse)?;
        self.tokens.invalidate(&key).await;
        let token = self.fetch_token(&key, &challenge).await?;

        let retried = self
            .send_manifest(method, &url, &key, Some(&token))
            .await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            return Err(RegistryError::AuthenticationFailed {
                registry: reference.registry.clone(),
            });
        }
        Self::accept_manifest_response(retried, &url)
    }

    async fn send_manifest(
        &self,
        method: Method,
        url: &str,
        key: &TokenKey,
        bearer: Option<&str>,
    ) -> Result<Response, RegistryError> {
        let mut request = self
            .http
            .request(method, url)
            .header(ACCEPT, MANIFEST_ACCEPT);
        request = match bearer {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => match self.credentials.lookup(&key.registry) {
                Some(credential) => request.header(
                    AUTHORIZATION,
                    format!("Basic {}", credential.basic_auth_b64()),
                ),
                None => request,
            },
        };
        Ok(request.send().await?)
    }

    fn accept_manifest_response(
        response: Response,
        url: &str,
    ) -> Result<Response, RegistryError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(RegistryError::ManifestFetchFailed {
                status: status.as_u16(),
                url: url.to_string(),
            })
        }
    }

    /// Fetch a bearer token from the challenge's realm and cache it for
    /// its stated lifetime.
    async fn fetch_token(
        &self,
        key: &TokenKey,
        challenge: &AuthChallenge,
    ) -> Result<String, RegistryError> {
        let mut url = Url::parse(&challenge.realm)
            .map_err(|err| RegistryError::Challenge(format!("bad realm: {err}")))?;
        let scope = challenge.scope.as_deref().unwrap_or(&key.scope);
        url.query_pairs_mut()
            .append_pair("service", &challenge.service)
            .append_pair("scope", scope);

        let mut request = self.http.get(url.clone());
        if let Some(credential) = self.credentials.lookup(&key.registry) {
            request = request.basic_auth(
                &credential.username,
                Some(credential.password.expose_secret()),
            );
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::Token(format!(
                "token endpoint {} answered HTTP {}",
                url,
                response.status().as_u16()
            )));
        }
        let grant: TokenGrant = response
            .json()
            .await
            .map_err(|err| RegistryError::Token(err.to_string()))?;
        let token = grant
            .bearer()
            .ok_or_else(|| RegistryError::Token("grant carries no token".into()))?
            .to_string();
        debug!(registry = key.registry, repository = key.repository, "Fetched registry token");
        self.tokens.insert(key.clone(), token.clone(), grant.ttl()).await;
        Ok(token)
    }

    /// Compare a workload's current digest with the registry's answer.
    ///
    /// Digest-pinned references and local-only `sha256:` identifiers are
    /// answered without touching the network.
    pub async fn check_for_update(
        &self,
        current_digest: &str,
        image_name: &str,
    ) -> Result<UpdateCheck, RegistryError> {
        if image_name.starts_with("sha256:") {
            return Ok(UpdateCheck::skipped(current_digest, "local image"));
        }
        let reference = ImageReference::parse(image_name)?;
        if reference.is_pinned() {
            return Ok(UpdateCheck::skipped(current_digest, "digest-pinned"));
        }

        let latest = self.head_manifest_digest(&reference).await?;
        let has_update = latest != current_digest;
        if has_update {
            info!(image = image_name, current = current_digest, latest, "Image digest drift detected");
        }
        Ok(UpdateCheck {
            has_update,
            current: current_digest.to_string(),
            latest: Some(latest),
            message: None,
        })
    }

    /// Check a batch, serialized per `(registry, repository)` so N
    /// workloads of one image cause one token fetch, with distinct keys
    /// checked concurrently under a parallelism bound.
    pub async fn check_many(
        &self,
        requests: Vec<CheckRequest>,
    ) -> Vec<Result<UpdateCheck, RegistryError>> {
        let concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let mut groups: HashMap<String, Vec<(usize, CheckRequest)>> = HashMap::new();
        for (index, request) in requests.into_iter().enumerate() {
            let group = match ImageReference::parse(&request.image) {
                Ok(reference) => {
                    format!("{}/{}", reference.registry, reference.repository_path())
                }
                // Unparseable names fail inside check_for_update; any
                // private group keeps them out of real keys' lanes.
                Err(_) => format!("invalid/{index}"),
            };
            groups.entry(group).or_default().push((index, request));
        }

        let mut results: Vec<Option<Result<UpdateCheck, RegistryError>>> = Vec::new();
        let total: usize = groups.values().map(Vec::len).sum();
        results.resize_with(total, || None);

        let grouped: Vec<Vec<(usize, CheckRequest)>> = groups.into_values().collect();
        let mut outcomes = stream::iter(grouped)
            .map(|group| async move {
                let mut answered = Vec::with_capacity(group.len());
                for (index, request) in group {
                    let outcome = self
                        .check_for_update(&request.current_digest, &request.image)
                        .await;
                    answered.push((index, outcome));
                }
                answered
            })
            .buffer_unordered(concurrency);

        while let Some(answered) = outcomes.next().await {
            for (index, outcome) in answered {
                results[index] = Some(outcome);
            }
        }
        results
            .into_iter()
            .map(|slot| slot.expect("every request index is answered once"))
            .collect()
    }
}
