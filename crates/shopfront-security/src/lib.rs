//! Security services built on the document store.
//!
//! - Fixed-window rate limiting
//! - Login attempt tracking with account lockout
//! - Persisted security alerts with out-of-band notification
//! - HMAC-signed, time-boxed download URLs

pub mod alerts;
pub mod config;
pub mod error;
pub mod login;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod signed_url;

use std::sync::Arc;

use shopfront_firestore::DocumentStore;

pub use alerts::{AlertNotifier, AlertService, TelegramNotifier};
pub use config::{Collections, SecurityConfig};
pub use error::{SecurityError, SecurityResult};
pub use login::{LockoutStatus, LoginGuard};
pub use models::{AlertSeverity, LoginAttempt, RateLimitWindow, SecurityAlert};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use signed_url::{SignedUrl, UrlSigner};

/// All security services wired to one store.
#[derive(Clone)]
pub struct SecurityServices {
    pub rate_limiter: Arc<RateLimiter>,
    pub login_guard: Arc<LoginGuard>,
    pub alerts: Arc<AlertService>,
    pub url_signer: Arc<UrlSigner>,
}

impl SecurityServices {
    /// Build every service from one config. Fails without a URL signing secret.
    pub fn new(store: Arc<dyn DocumentStore>, config: &SecurityConfig) -> SecurityResult<Self> {
        let mut alerts = AlertService::new(store.clone(), config);
        if let Some(notifier) = TelegramNotifier::from_config(config)? {
            alerts = alerts.with_notifier(Arc::new(notifier));
        }
        let alerts = Arc::new(alerts);

        Ok(Self {
            rate_limiter: Arc::new(RateLimiter::new(store.clone(), config)),
            login_guard: Arc::new(LoginGuard::new(store, alerts.clone(), config)),
            alerts,
            url_signer: Arc::new(UrlSigner::from_config(config)?),
        })
    }
}
