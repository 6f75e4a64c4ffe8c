use crate::registry::RegistryError;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Lifetime assumed for a grant that does not state one.
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60);

/// Parsed `WWW-Authenticate: Bearer ...` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub realm: String,
    pub service: String,
    pub scope: Option<String>,
}

impl AuthChallenge {
    /// Both `realm` and `service` are required; anything else fails.
    pub fn parse(header: &str) -> Result<Self, RegistryError> {
        let rest = header
            .trim()
            .strip_prefix("Bearer ")
            .ok_or_else(|| RegistryError::Challenge(format!("not a Bearer challenge: '{header}'")))?;

        let mut params = HashMap::new();
        for part in split_challenge_params(rest) {
            if let Some((name, value)) = part.split_once('=') {
                params.insert(
                    name.trim().to_ascii_lowercase(),
                    value.trim().trim_matches('"').to_string(),
                );
            }
        }

        let realm = params
            .remove("realm")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RegistryError::Challenge("challenge is missing realm".into()))?;
        let service = params
            .remove("service")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RegistryError::Challenge("challenge is missing service".into()))?;

        Ok(Self {
            realm,
            service,
            scope: params.remove("scope").filter(|v| !v.is_empty()),
        })
    }
}

/// Split on commas that sit outside quoted values.
fn split_challenge_params(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Token endpoint response; registries answer with either `token` or
/// `access_token`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub issued_at: Option<String>,
}

impl TokenGrant {
    pub fn bearer(&self) -> Option<&str> {
        self.token
            .as_deref()
            .or(self.access_token.as_deref())
            .filter(|t| !t.is_empty())
    }

    pub fn ttl(&self) -> Duration {
        self.expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub registry: String,
    pub repository: String,
    pub scope: String,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// In-memory bearer token cache, keyed `(registry, repository, scope)`.
pub struct TokenCache {
    entries: RwLock<HashMap<TokenKey, CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &TokenKey) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|cached| !cached.is_expired())
            .map(|cached| cached.token.clone())
    }

    pub async fn insert(&self, key: TokenKey, token: String, ttl: Duration) {
        debug!(
            registry = key.registry,
            repository = key.repository,
            ttl_secs = ttl.as_secs(),
            "Caching registry token"
        );
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CachedToken {
                token,
                cached_at: Instant::now(),
                ttl,
            },
        );
    }

    pub async fn invalidate(&self, key: &TokenKey) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_challenge() {
        let challenge = AuthChallenge::parse(
            r#"Bearer realm="https://auth.example/token",service="ex.io",scope="repository:a/b:pull""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://auth.example/token");
        assert_eq!(challenge.service, "ex.io");
        assert_eq!(challenge.scope.as_deref(), Some("repository:a/b:pull"));
    }

    #[test]
    fn test_parse_without_scope() {
        let challenge =
            AuthChallenge::parse(r#"Bearer realm="https://r",service="s""#).unwrap();
        assert!(challenge.scope.is_none());
    }

    #[test]
    fn test_comma_inside_quoted_value() {
        let challenge = AuthChallenge::parse(
            r#"Bearer realm="https://r",service="s",scope="repository:a:pull,push""#,
        )
        .unwrap();
        assert_eq!(challenge.scope.as_deref(), Some("repository:a:pull,push"));
    }

    #[test]
    fn test_missing_realm_or_service_fails() {
        assert!(AuthChallenge::parse(r#"Bearer service="s""#).is_err());
        assert!(AuthChallenge::parse(r#"Bearer realm="https://r""#).is_err());
        assert!(AuthChallenge::parse(r#"Basic realm="r""#).is_err());
    }

    #[test]
    fn test_grant_accepts_either_token_field() {
        let grant: TokenGrant = serde_json::from_str(r#"{"token":"A"}"#).unwrap();
        assert_eq!(grant.bearer(), Some("A"));
        let grant: TokenGrant = serde_json::from_str(r#"{"access_token":"B"}"#).unwrap();
        assert_eq!(grant.bearer(), Some("B"));
        let grant: TokenGrant = serde_json::from_str("{}").unwrap();
        assert!(grant.bearer().is_none());
    }

    #[test]
    fn test_grant_default_ttl() {
        let grant: TokenGrant = serde_json::from_str(r#"{"token":"A"}"#).unwrap();
        assert_eq!(grant.ttl(), Duration::from_secs(60));
        let grant: TokenGrant =
            serde_json::from_str(r#"{"token":"A","expires_in":300}"#).unwrap();
        assert_eq!(grant.ttl(), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_cache_round_trip_and_invalidate() {
        let cache = TokenCache::new();
        let key = TokenKey {
            registry: "ghcr.io".into(),
            repository: "o/r".into(),
            scope: "repository:o/r:pull".into(),
        };
        assert!(cache.get(&key).await.is_none());
        cache
            .insert(key.clone(), "tok".into(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get(&key).await.as_deref(), Some("tok"));
        cache.invalidate(&key).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_is_not_returned() {
        let cache = TokenCache::new();
        let key = TokenKey {
            registry: "ghcr.io".into(),
            repository: "o/r".into(),
            scope: "repository:o/r:pull".into(),
        };
        cache
            .insert(key.clone(), "tok".into(), Duration::from_secs(10))
            .await;
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get(&key).await.is_none());
    }
}
