//! Fixed-window rate limiting backed by the document store.
//!
//! Each `(identifier, endpoint)` pair has at most one live window record.
//! A check reads the live window and then writes, without a transaction:
//! concurrent checks inside one window can read the same count and both be
//! allowed, so a burst may exceed the limit by the number of racing
//! requests. Denials are exact once the stored count reaches the limit.
//! Superseded windows stay in the store until [`RateLimiter::sweep_expired`]
//! removes them.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use shopfront_firestore::{DocumentStore, FieldOp, Fields, Query};
use tracing::{debug, info};

use crate::config::SecurityConfig;
use crate::error::SecurityResult;
use crate::metrics;
use crate::models::RateLimitWindow;

/// Upper bound of stale windows removed per sweep.
const SWEEP_BATCH: u32 = 500;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the current window ends.
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, at least 1.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.reset_at - now).num_seconds().max(1) as u64
    }
}

pub struct RateLimiter {
    store: Arc<dyn DocumentStore>,
    collection: String,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn DocumentStore>, config: &SecurityConfig) -> Self {
        Self::with_window(
            store,
            config.collections.rate_limits.clone(),
            config.rate_limit_window,
        )
    }

    pub fn with_window(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        window: std::time::Duration,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            window: Duration::seconds(window.as_secs().max(1) as i64),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count one request and decide whether it is allowed.
    pub async fn check(
        &self,
        identifier: &str,
        endpoint: &str,
        max_requests: u32,
    ) -> SecurityResult<RateLimitDecision> {
        self.check_at(identifier, endpoint, max_requests, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        identifier: &str,
        endpoint: &str,
        max_requests: u32,
        now: DateTime<Utc>,
    ) -> SecurityResult<RateLimitDecision> {
        if max_requests == 0 {
            return Ok(self.deny(endpoint, now + self.window));
        }

        let query = Query::new(self.collection.as_str())
            .where_eq(RateLimitWindow::IDENTIFIER, identifier)
            .where_eq(RateLimitWindow::ENDPOINT, endpoint)
            .filter(RateLimitWindow::WINDOW_START, FieldOp::GreaterThan, now - self.window)
            .limit(1);

        let current = self
            .store
            .run_query(&query)
            .await?
            .into_iter()
            .next()
            .map(RateLimitWindow::from_document)
            .transpose()?;

        let Some(window) = current else {
            let window = RateLimitWindow::open(identifier, endpoint, now);
            self.store.create(&self.collection, window.to_fields()).await?;
            debug!(identifier = %identifier, endpoint = %endpoint, "Opened rate limit window");

            return Ok(RateLimitDecision {
                allowed: true,
                remaining: max_requests - 1,
                reset_at: window.resets_at(self.window),
            });
        };

        let reset_at = window.resets_at(self.window);
        if window.count >= max_requests {
            info!(
                identifier = %identifier,
                endpoint = %endpoint,
                count = window.count,
                "Rate limit exceeded"
            );
            return Ok(self.deny(endpoint, reset_at));
        }

        let count = window.count + 1;
        if let Some(id) = window.id.as_deref() {
            let update = Fields::from([(RateLimitWindow::COUNT.to_string(), count.into())]);
            self.store.update(&self.collection, id, update).await?;
        }

        Ok(RateLimitDecision {
            allowed: true,
            remaining: max_requests - count,
            reset_at,
        })
    }

    fn deny(&self, endpoint: &str, reset_at: DateTime<Utc>) -> RateLimitDecision {
        metrics::record_rate_limit_denied(endpoint);
        RateLimitDecision {
            allowed: false,
            remaining: 0,
            reset_at,
        }
    }

    /// Delete windows that ended before `now`. Returns how many were removed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> SecurityResult<usize> {
        let query = Query::new(self.collection.as_str())
            .filter(RateLimitWindow::WINDOW_START, FieldOp::LessThanOrEqual, now - self.window)
            .limit(SWEEP_BATCH);

        let stale = self.store.run_query(&query).await?;
        for doc in &stale {
            self.store.delete(&self.collection, &doc.id).await?;
        }

        if !stale.is_empty() {
            info!(removed = stale.len(), "Swept expired rate limit windows");
        }
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use shopfront_firestore::MemoryStore;

    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    fn limiter(store: Arc<MemoryStore>) -> RateLimiter {
        RateLimiter::with_window(store, "rate_limits", std::time::Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_remaining_decreases_then_denies() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter(store.clone());
        let now = start();

        let mut remaining = Vec::new();
        for i in 0..5 {
            let decision = limiter
                .check_at("1.2.3.4", "/login", 5, now + Duration::seconds(i))
                .await
                .unwrap();
            assert!(decision.allowed);
            remaining.push(decision.remaining);
        }
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

        let denied = limiter
            .check_at("1.2.3.4", "/login", 5, now + Duration::seconds(10))
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, now + Duration::seconds(60));
        assert_eq!(denied.retry_after_secs(now + Duration::seconds(10)), 50);

        assert_eq!(store.len("rate_limits").await, 1);
    }

    #[tokio::test]
    async fn test_new_window_after_expiry() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter(store.clone());
        let now = start();

        limiter.check_at("ip", "/login", 1, now).await.unwrap();
        assert!(!limiter.check_at("ip", "/login", 1, now + Duration::seconds(30)).await.unwrap().allowed);

        let later = now + Duration::seconds(60);
        let decision = limiter.check_at("ip", "/login", 1, later).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_at, later + Duration::seconds(60));
        assert_eq!(store.len("rate_limits").await, 2);
    }

    #[tokio::test]
    async fn test_identifiers_and_endpoints_are_independent() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter(store);
        let now = start();

        assert!(limiter.check_at("a", "/login", 1, now).await.unwrap().allowed);
        assert!(limiter.check_at("b", "/login", 1, now).await.unwrap().allowed);
        assert!(limiter.check_at("a", "/checkout", 1, now).await.unwrap().allowed);
        assert!(!limiter.check_at("a", "/login", 1, now).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_zero_limit_denies_without_writing() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter(store.clone());

        let decision = limiter.check_at("ip", "/login", 0, start()).await.unwrap();
        assert!(!decision.allowed);
        assert!(store.is_empty("rate_limits").await);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_ended_windows() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter(store.clone());
        let now = start();

        limiter.check_at("old", "/login", 5, now).await.unwrap();
        limiter
            .check_at("fresh", "/login", 5, now + Duration::seconds(90))
            .await
            .unwrap();

        let removed = limiter.sweep_expired(now + Duration::seconds(100)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len("rate_limits").await, 1);
    }
}
