//! Security alerts.
//!
//! Every alert is persisted. High and critical alerts are also pushed to an
//! [`AlertNotifier`] on a detached task; a failed push is logged and never
//! reaches the caller that raised the alert.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::json;
use shopfront_firestore::{DocumentStore, Fields};
use tracing::{debug, info, warn};

use crate::config::SecurityConfig;
use crate::error::{SecurityError, SecurityResult};
use crate::metrics;
use crate::models::{AlertSeverity, SecurityAlert};

/// Public bot platform API root.
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Out-of-band delivery of an alert.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, alert: &SecurityAlert) -> SecurityResult<()>;
}

// ============================================================================
// Telegram notifier
// ============================================================================

/// Posts alerts to a chat through the bot `sendMessage` method.
pub struct TelegramNotifier {
    http: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(http: Client, bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            http,
            api_base: TELEGRAM_API_BASE.to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        }
    }

    /// Notifier for the configured chat, if alerting is configured.
    pub fn from_config(config: &SecurityConfig) -> SecurityResult<Option<Self>> {
        let (Some(token), Some(chat_id)) = (&config.alert_bot_token, &config.alert_chat_id) else {
            return Ok(None);
        };

        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Some(Self::new(http, token.clone(), chat_id.clone())))
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn message_text(alert: &SecurityAlert) -> String {
        let mut text = format!(
            "[{}] {}\n{}",
            alert.severity.as_str().to_uppercase(),
            alert.alert_type,
            alert.message
        );
        for (key, value) in &alert.metadata {
            match value.as_str() {
                Some(s) => text.push_str(&format!("\n{}: {}", key, s)),
                None => text.push_str(&format!("\n{}: {:?}", key, value)),
            }
        }
        text.push_str(&format!("\n{}", alert.timestamp.to_rfc3339()));
        text
    }
}

#[async_trait]
impl AlertNotifier for TelegramNotifier {
    async fn notify(&self, alert: &SecurityAlert) -> SecurityResult<()> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            self.bot_token
        );
        let payload = json!({
            "chat_id": self.chat_id,
            "text": Self::message_text(alert),
        });

        let response = self.http.post(&url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SecurityError::notification(format!(
                "sendMessage returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        debug!(alert_type = %alert.alert_type, "Alert notification delivered");
        Ok(())
    }
}

// ============================================================================
// Alert service
// ============================================================================

pub struct AlertService {
    store: Arc<dyn DocumentStore>,
    collection: String,
    notifier: Option<Arc<dyn AlertNotifier>>,
}

impl AlertService {
    pub fn new(store: Arc<dyn DocumentStore>, config: &SecurityConfig) -> Self {
        Self {
            store,
            collection: config.collections.security_alerts.clone(),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Persist an alert and return its id.
    pub async fn raise(
        &self,
        alert_type: &str,
        severity: AlertSeverity,
        message: &str,
        metadata: Fields,
    ) -> SecurityResult<String> {
        self.raise_at(alert_type, severity, message, metadata, Utc::now())
            .await
    }

    pub async fn raise_at(
        &self,
        alert_type: &str,
        severity: AlertSeverity,
        message: &str,
        metadata: Fields,
        now: DateTime<Utc>,
    ) -> SecurityResult<String> {
        let alert = SecurityAlert::new(alert_type, severity, message, metadata, now);

        metrics::record_alert(&alert.alert_type, severity);

        if severity.requires_notification() {
            self.dispatch(alert.clone());
        }

        let id = self.store.create(&self.collection, alert.to_fields()).await?;
        info!(
            alert_id = %id,
            alert_type = %alert_type,
            severity = %severity,
            "Security alert recorded"
        );
        Ok(id)
    }

    /// Push the alert on a detached task.
    fn dispatch(&self, alert: SecurityAlert) {
        let Some(notifier) = self.notifier.clone() else {
            debug!(alert_type = %alert.alert_type, "No alert notifier configured");
            return;
        };

        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&alert).await {
                metrics::record_notification_failure(alert.severity);
                warn!(
                    alert_type = %alert.alert_type,
                    severity = %alert.severity,
                    "Failed to deliver alert notification: {}",
                    e
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use shopfront_firestore::{MemoryStore, NativeValue, Query};
    use tokio::sync::mpsc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    struct ChannelNotifier(mpsc::UnboundedSender<SecurityAlert>);

    #[async_trait]
    impl AlertNotifier for ChannelNotifier {
        async fn notify(&self, alert: &SecurityAlert) -> SecurityResult<()> {
            let _ = self.0.send(alert.clone());
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl AlertNotifier for FailingNotifier {
        async fn notify(&self, _alert: &SecurityAlert) -> SecurityResult<()> {
            Err(SecurityError::notification("bot unreachable"))
        }
    }

    fn service(store: Arc<MemoryStore>) -> AlertService {
        AlertService::new(store, &SecurityConfig::default())
    }

    #[tokio::test]
    async fn test_low_severity_is_persisted_without_notification() {
        let store = Arc::new(MemoryStore::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let alerts = service(store.clone()).with_notifier(Arc::new(ChannelNotifier(tx)));

        let id = alerts
            .raise("suspicious_query", AlertSeverity::Low, "odd filter", Fields::new())
            .await
            .unwrap();

        let doc = store.get(&format!("security_alerts/{}", id)).await.unwrap().unwrap();
        assert_eq!(doc.fields["severity"], NativeValue::from("low"));

        drop(alerts);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_critical_alert_is_pushed() {
        let store = Arc::new(MemoryStore::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let alerts = service(store).with_notifier(Arc::new(ChannelNotifier(tx)));

        alerts
            .raise("signature_forgery", AlertSeverity::Critical, "bad sig burst", Fields::new())
            .await
            .unwrap();

        let pushed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pushed.alert_type, "signature_forgery");
        assert_eq!(pushed.severity, AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_fail_raise() {
        let store = Arc::new(MemoryStore::new());
        let alerts = service(store.clone()).with_notifier(Arc::new(FailingNotifier));

        alerts
            .raise("account_lockout", AlertSeverity::High, "locked", Fields::new())
            .await
            .unwrap();

        let stored = store.run_query(&Query::new("security_alerts")).await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_telegram_notifier_posts_send_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_string_contains("-100200"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::new(Client::new(), "123:abc", "-100200").with_api_base(server.uri());
        let alert = SecurityAlert::new(
            "account_lockout",
            AlertSeverity::High,
            "5 failed logins",
            Fields::from([("email".to_string(), NativeValue::from("a@shop.test"))]),
            Utc::now(),
        );

        notifier.notify(&alert).await.unwrap();
        let text = TelegramNotifier::message_text(&alert);
        assert!(text.starts_with("[HIGH] account_lockout"));
        assert!(text.contains("email: a@shop.test"));
    }

    #[tokio::test]
    async fn test_telegram_notifier_surfaces_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("bot was kicked"))
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::new(Client::new(), "t", "c").with_api_base(server.uri());
        let alert = SecurityAlert::new("x", AlertSeverity::Critical, "m", Fields::new(), Utc::now());

        let err = notifier.notify(&alert).await.unwrap_err();
        assert!(err.to_string().contains("bot was kicked"));
    }

    #[tokio::test]
    async fn test_transport_error_does_not_expose_bot_token() {
        let notifier = TelegramNotifier::new(Client::new(), "123456:SECRET-BOT-TOKEN", "c")
            .with_api_base("http://127.0.0.1:1");
        let alert = SecurityAlert::new("x", AlertSeverity::High, "m", Fields::new(), Utc::now());

        let err = notifier.notify(&alert).await.unwrap_err();
        assert!(matches!(err, SecurityError::Notification(_)));
        assert!(!err.to_string().contains("SECRET-BOT-TOKEN"), "{}", err);
    }

    #[test]
    fn test_notifier_requires_both_settings() {
        let config = SecurityConfig {
            alert_bot_token: Some("123:abc".into()),
            ..SecurityConfig::default()
        };
        assert!(TelegramNotifier::from_config(&config).unwrap().is_none());
    }
}
