//! Access token reuse.
//!
//! Reusing a token within its validity window is only an optimization: a
//! cold cache, or a host that drops process state between invocations,
//! simply mints again.
//!
//! - Refresh margin to avoid token expiry during requests
//! - Single-flight refresh so concurrent callers mint once
//! - Fallback to a still-usable token when a refresh fails

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::FirestoreResult;
use crate::token::{AccessToken, TokenMinter};

/// Refresh a token this many seconds before it expires.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Thread-safe token cache in front of a [`TokenMinter`].
pub struct TokenCache {
    minter: TokenMinter,
    cache: RwLock<Option<AccessToken>>,
}

impl TokenCache {
    pub fn new(minter: TokenMinter) -> Self {
        Self {
            minter,
            cache: RwLock::new(None),
        }
    }

    /// Drop the cached token (e.g. after the store reported it expired).
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
    }

    /// Get a valid access token, minting if necessary.
    pub async fn get_token(&self) -> FirestoreResult<AccessToken> {
        {
            let cache = self.cache.read().await;
            if let Some(token) = cache.as_ref().filter(|t| is_fresh(t)) {
                return Ok(token.clone());
            }
        }

        let mut cache = self.cache.write().await;

        // Another task may have refreshed while we waited for the lock.
        if let Some(token) = cache.as_ref().filter(|t| is_fresh(t)) {
            return Ok(token.clone());
        }

        match self.minter.mint().await {
            Ok(token) => {
                debug!(expires_at = token.expires_at(), "Cached fresh access token");
                *cache = Some(token.clone());
                Ok(token)
            }
            Err(e) => {
                if let Some(token) = cache.as_ref().filter(|t| !t.is_expired_at(Utc::now().timestamp())) {
                    warn!("Token refresh failed, using existing token: {}", e);
                    return Ok(token.clone());
                }
                Err(e)
            }
        }
    }
}

fn is_fresh(token: &AccessToken) -> bool {
    !token.is_expired_at(Utc::now().timestamp() + TOKEN_REFRESH_MARGIN_SECS)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::Client;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::credential::ServiceAccountCredential;
    use crate::error::FirestoreError;

    const TEST_KEY: &str = include_str!("../tests/fixtures/test_service_account_key.pem");

    fn cache_for(server: &MockServer) -> TokenCache {
        let credential = ServiceAccountCredential::new("edge@shop.iam", TEST_KEY, "shop");
        let minter = TokenMinter::new(Client::new(), Arc::new(credential))
            .with_token_url(format!("{}/token", server.uri()));
        TokenCache::new(minter)
    }

    #[test]
    fn test_refresh_margin() {
        let now = Utc::now().timestamp();
        assert!(!is_fresh(&AccessToken::new("t", now + 30)));
        assert!(is_fresh(&AccessToken::new("t", now + 3600)));
    }

    #[tokio::test]
    async fn test_token_reused_within_validity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.cached",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        let first = cache.get_token().await.unwrap();
        let second = cache.get_token().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_invalidate_forces_mint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.again",
                "expires_in": 3600
            })))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        cache.get_token().await.unwrap();
        cache.invalidate().await;
        cache.get_token().await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_failure_without_token_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized_client"))
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        let err = cache.get_token().await.unwrap_err();
        assert!(matches!(err, FirestoreError::AuthFailure(_)));
    }
}
