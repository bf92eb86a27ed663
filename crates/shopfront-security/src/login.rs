//! Login attempt tracking and account lockout.
//!
//! Attempts are appended to an audit collection and never modified. An
//! account is locked while the number of failed attempts inside the lockout
//! window, counted by email or by source address (whichever is higher),
//! is at or above the threshold. A successful login does not clear earlier
//! failures; the lock lifts as they age out of the window.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use shopfront_firestore::{DocumentStore, FieldOp, Fields, NativeValue, Query};
use tracing::{info, warn};

use crate::alerts::AlertService;
use crate::config::SecurityConfig;
use crate::error::SecurityResult;
use crate::metrics;
use crate::models::{AlertSeverity, LoginAttempt};

/// Lockout state for an email / address pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutStatus {
    /// Recent failures (the higher of the per-email and per-address counts).
    pub failures: u32,
    pub threshold: u32,
    pub locked: bool,
}

pub struct LoginGuard {
    store: Arc<dyn DocumentStore>,
    alerts: Arc<AlertService>,
    collection: String,
    max_attempts: u32,
    lockout_window: Duration,
}

impl LoginGuard {
    pub fn new(store: Arc<dyn DocumentStore>, alerts: Arc<AlertService>, config: &SecurityConfig) -> Self {
        Self {
            store,
            alerts,
            collection: config.collections.login_attempts.clone(),
            max_attempts: config.max_login_attempts.max(1),
            lockout_window: Duration::seconds(config.lockout_window.as_secs() as i64),
        }
    }

    /// Append an attempt and return the resulting lockout state.
    pub async fn record_attempt(
        &self,
        email: &str,
        ip_address: &str,
        user_agent: Option<&str>,
        success: bool,
    ) -> SecurityResult<LockoutStatus> {
        self.record_attempt_at(email, ip_address, user_agent, success, Utc::now())
            .await
    }

    pub async fn record_attempt_at(
        &self,
        email: &str,
        ip_address: &str,
        user_agent: Option<&str>,
        success: bool,
        now: DateTime<Utc>,
    ) -> SecurityResult<LockoutStatus> {
        let email = normalize_email(email);
        let before = if success {
            None
        } else {
            Some(self.lockout_status_at(&email, ip_address, now).await?)
        };

        let attempt = LoginAttempt {
            id: None,
            email: email.clone(),
            ip_address: ip_address.to_string(),
            user_agent: user_agent.map(str::to_string),
            success,
            timestamp: now,
            extra: Fields::new(),
        };
        self.store.create(&self.collection, attempt.to_fields()).await?;

        let status = self.lockout_status_at(&email, ip_address, now).await?;
        let Some(before) = before else {
            return Ok(status);
        };

        metrics::record_login_failure();
        warn!(
            email = %email,
            ip = %ip_address,
            failures = status.failures,
            threshold = status.threshold,
            "Failed login attempt"
        );

        // Concurrent failures that cross together may each raise the alert.
        if !before.locked && status.locked {
            info!(email = %email, ip = %ip_address, "Account locked after repeated failures");
            metrics::record_lockout();
            let metadata = Fields::from([
                ("email".to_string(), NativeValue::from(email.as_str())),
                ("ip_address".to_string(), NativeValue::from(ip_address)),
                ("failures".to_string(), NativeValue::from(status.failures)),
            ]);
            self.alerts
                .raise_at(
                    "account_lockout",
                    AlertSeverity::High,
                    &format!("{} failed login attempts for {}", status.failures, email),
                    metadata,
                    now,
                )
                .await?;
        }

        Ok(status)
    }

    pub async fn is_account_locked(&self, email: &str, ip_address: &str) -> SecurityResult<bool> {
        Ok(self.lockout_status(email, ip_address).await?.locked)
    }

    pub async fn lockout_status(&self, email: &str, ip_address: &str) -> SecurityResult<LockoutStatus> {
        self.lockout_status_at(&normalize_email(email), ip_address, Utc::now())
            .await
    }

    pub async fn lockout_status_at(
        &self,
        email: &str,
        ip_address: &str,
        now: DateTime<Utc>,
    ) -> SecurityResult<LockoutStatus> {
        let cutoff = now - self.lockout_window;

        let by_email = self.recent_failures(LoginAttempt::EMAIL, email, cutoff).await?;
        let by_address = self
            .recent_failures(LoginAttempt::IP_ADDRESS, ip_address, cutoff)
            .await?;
        let failures = by_email.max(by_address);

        Ok(LockoutStatus {
            failures,
            threshold: self.max_attempts,
            locked: failures >= self.max_attempts,
        })
    }

    async fn recent_failures(&self, field: &str, value: &str, cutoff: DateTime<Utc>) -> SecurityResult<u32> {
        let query = Query::new(self.collection.as_str())
            .where_eq(field, value)
            .where_eq(LoginAttempt::SUCCESS, false)
            .filter(LoginAttempt::TIMESTAMP, FieldOp::GreaterThanOrEqual, cutoff);

        let docs = self.store.run_query(&query).await?;
        Ok(u32::try_from(docs.len()).unwrap_or(u32::MAX))
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use shopfront_firestore::{DocumentData, FirestoreResult, MemoryStore};

    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
    }

    /// Store that appends a second failed attempt after each attempt it
    /// records while `racing` is set, as a concurrent client would.
    struct RacingStore {
        inner: MemoryStore,
        racing: AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for RacingStore {
        async fn create(&self, collection: &str, fields: Fields) -> FirestoreResult<String> {
            let id = self.inner.create(collection, fields.clone()).await?;
            if self.racing.swap(false, Ordering::SeqCst) {
                self.inner.create(collection, fields).await?;
            }
            Ok(id)
        }

        async fn update(&self, collection: &str, id: &str, fields: Fields) -> FirestoreResult<()> {
            self.inner.update(collection, id, fields).await
        }

        async fn delete(&self, collection: &str, id: &str) -> FirestoreResult<()> {
            self.inner.delete(collection, id).await
        }

        async fn get(&self, path: &str) -> FirestoreResult<Option<DocumentData>> {
            self.inner.get(path).await
        }

        async fn run_query(&self, query: &Query) -> FirestoreResult<Vec<DocumentData>> {
            self.inner.run_query(query).await
        }
    }

    fn guard(store: Arc<MemoryStore>) -> LoginGuard {
        let config = SecurityConfig::default();
        let alerts = Arc::new(AlertService::new(store.clone(), &config));
        LoginGuard::new(store, alerts, &config)
    }

    #[tokio::test]
    async fn test_locks_after_five_failures() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(store.clone());
        let now = start();

        for i in 0..4 {
            let status = guard
                .record_attempt_at("shopper@shop.test", "10.0.0.1", Some("ua"), false, now + Duration::seconds(i))
                .await
                .unwrap();
            assert!(!status.locked);
            assert_eq!(status.failures, i as u32 + 1);
        }

        let status = guard
            .record_attempt_at("shopper@shop.test", "10.0.0.1", None, false, now + Duration::seconds(5))
            .await
            .unwrap();
        assert!(status.locked);
        assert_eq!(store.len("security_alerts").await, 1);

        let status = guard
            .record_attempt_at("shopper@shop.test", "10.0.0.1", None, false, now + Duration::seconds(6))
            .await
            .unwrap();
        assert!(status.locked);
        assert_eq!(status.failures, 6);
        assert_eq!(store.len("security_alerts").await, 1);
    }

    #[tokio::test]
    async fn test_uses_higher_of_email_and_address_counts() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(store);
        let now = start();

        // Same address, rotating emails.
        for i in 0..3 {
            guard
                .record_attempt_at(&format!("user{}@shop.test", i), "203.0.113.9", None, false, now)
                .await
                .unwrap();
        }
        // Same email from two addresses.
        guard
            .record_attempt_at("victim@shop.test", "198.51.100.1", None, false, now)
            .await
            .unwrap();
        let status = guard
            .record_attempt_at("victim@shop.test", "203.0.113.9", None, false, now)
            .await
            .unwrap();

        // by email = 2, by address = 4
        assert_eq!(status.failures, 4);
        assert!(!status.locked);
    }

    #[tokio::test]
    async fn test_success_does_not_reset_and_failures_age_out() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(store);
        let now = start();

        for _ in 0..5 {
            guard
                .record_attempt_at("Shopper@Shop.test ", "10.0.0.2", None, false, now)
                .await
                .unwrap();
        }

        let status = guard
            .record_attempt_at("shopper@shop.test", "10.0.0.2", None, true, now + Duration::seconds(1))
            .await
            .unwrap();
        assert!(status.locked);

        let later = guard
            .lockout_status_at("shopper@shop.test", "10.0.0.2", now + Duration::seconds(901))
            .await
            .unwrap();
        assert_eq!(later.failures, 0);
        assert!(!later.locked);
    }

    #[tokio::test]
    async fn test_alert_fires_when_concurrent_failures_overshoot_threshold() {
        let store = Arc::new(RacingStore {
            inner: MemoryStore::new(),
            racing: AtomicBool::new(false),
        });
        let config = SecurityConfig::default();
        let alerts = Arc::new(AlertService::new(store.clone(), &config));
        let guard = LoginGuard::new(store.clone(), alerts, &config);
        let now = start();

        for _ in 0..4 {
            guard
                .record_attempt_at("shopper@shop.test", "10.0.0.3", None, false, now)
                .await
                .unwrap();
        }

        store.racing.store(true, Ordering::SeqCst);
        let status = guard
            .record_attempt_at("shopper@shop.test", "10.0.0.3", None, false, now)
            .await
            .unwrap();

        // Six failures were counted, skipping five.
        assert_eq!(status.failures, 6);
        assert!(status.locked);
        assert_eq!(store.inner.len("security_alerts").await, 1);
    }
}
