use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

use crate::iap::IapError;

/// Bearer token with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Usable at `now` when it will not expire within `margin`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin < self.expires_at
    }
}

/// Anything that can mint a fresh service-account token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessToken, IapError>;
}

/// OAuth client-credentials exchange against the admin realm.
pub struct ClientCredentials {
    http: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

impl ClientCredentials {
    pub fn new(
        http: reqwest::Client,
        base_url: &Url,
        admin_realm: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, IapError> {
        let mut token_url = base_url.clone();
        token_url
            .path_segments_mut()
            .map_err(|_| IapError::InvalidUrl(base_url.to_string()))?
            .pop_if_empty()
            .extend(["realms", admin_realm, "protocol", "openid-connect", "token"]);

        Ok(Self {
            http,
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }
}

#[async_trait]
impl TokenSource for ClientCredentials {
    async fn fetch_token(&self) -> Result<AccessToken, IapError> {
        let issued_at = Utc::now();
        let response = self
            .http
            .post(self.token_url.clone())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IapError::Token(format!("{}: {}", status, body)));
        }

        let token: TokenResponse = response.json().await?;
        Ok(AccessToken {
            value: token.access_token,
            expires_at: issued_at + Duration::seconds(token.expires_in),
        })
    }
}

/// Shared service-account token, refreshed when it gets close to expiry.
///
/// Readers share the cached token under a read lock; a refresh takes the
/// write lock and re-checks so concurrent callers trigger one exchange.
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    margin: Duration,
    cached: RwLock<Option<AccessToken>>,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>, margin: Duration) -> Self {
        Self {
            source,
            margin,
            cached: RwLock::new(None),
        }
    }

    /// Return a token valid at `now` and whether a refresh was needed.
    pub async fn get_valid_token(&self, now: DateTime<Utc>) -> Result<(String, bool), IapError> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref().filter(|t| t.is_valid_at(now, self.margin)) {
                return Ok((token.value.clone(), false));
            }
        }

        let mut cached = self.cached.write().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_valid_at(now, self.margin)) {
            return Ok((token.value.clone(), false));
        }

        let fresh = self.source.fetch_token().await?;
        tracing::debug!("Refreshed identity provider token, expires at {}", fresh.expires_at);
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok((value, true))
    }

    pub async fn token(&self) -> Result<String, IapError> {
        self.get_valid_token(Utc::now()).await.map(|(token, _)| token)
    }

    /// Forget the cached token; the next call fetches a new one.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        issued: AtomicUsize,
        lifetime: Duration,
        base: DateTime<Utc>,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn fetch_token(&self) -> Result<AccessToken, IapError> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst);
            Ok(AccessToken {
                value: format!("token-{}", n),
                expires_at: self.base + self.lifetime * (n as i32 + 1),
            })
        }
    }

    fn cache(lifetime_secs: i64) -> (Arc<CountingSource>, TokenCache, DateTime<Utc>) {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let source = Arc::new(CountingSource {
            issued: AtomicUsize::new(0),
            lifetime: Duration::seconds(lifetime_secs),
            base,
        });
        let cache = TokenCache::new(source.clone(), Duration::seconds(10));
        (source, cache, base)
    }

    #[tokio::test]
    async fn reuses_token_until_refresh_margin() {
        let (source, cache, base) = cache(60);

        assert_eq!(cache.get_valid_token(base).await.unwrap(), ("token-0".to_string(), true));
        assert_eq!(
            cache.get_valid_token(base + Duration::seconds(30)).await.unwrap(),
            ("token-0".to_string(), false)
        );
        // 51s in, the token expires within the 10s margin.
        assert_eq!(
            cache.get_valid_token(base + Duration::seconds(51)).await.unwrap(),
            ("token-1".to_string(), true)
        );
        assert_eq!(source.issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let (source, cache, base) = cache(300);

        cache.get_valid_token(base).await.unwrap();
        cache.invalidate().await;
        let (token, refreshed) = cache.get_valid_token(base).await.unwrap();

        assert!(refreshed);
        assert_eq!(token, "token-1");
        assert_eq!(source.issued.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn validity_respects_margin() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let token = AccessToken {
            value: "t".to_string(),
            expires_at: base + Duration::seconds(20),
        };
        assert!(token.is_valid_at(base, Duration::seconds(10)));
        assert!(!token.is_valid_at(base + Duration::seconds(10), Duration::seconds(10)));
    }

    #[test]
    fn token_url_targets_admin_realm() {
        let base = Url::parse("https://iam.example.com/").unwrap();
        let source =
            ClientCredentials::new(reqwest::Client::new(), &base, "master", "provisioner", "s3cret").unwrap();
        assert_eq!(
            source.token_url.as_str(),
            "https://iam.example.com/realms/master/protocol/openid-connect/token"
        );
    }
}
