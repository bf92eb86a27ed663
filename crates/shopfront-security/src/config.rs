//! Security service configuration.

use std::time::Duration;

/// Collection names the security services write to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collections {
    pub rate_limits: String,
    pub login_attempts: String,
    pub security_alerts: String,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            rate_limits: "rate_limits".to_string(),
            login_attempts: "login_attempts".to_string(),
            security_alerts: "security_alerts".to_string(),
        }
    }
}

/// Settings shared by the security services.
///
/// Loaded once and passed to each service; nothing reads the environment
/// after construction.
#[derive(Clone)]
pub struct SecurityConfig {
    /// Length of a rate-limit window
    pub rate_limit_window: Duration,
    /// Failed logins that lock an account
    pub max_login_attempts: u32,
    /// How far back failed logins are counted
    pub lockout_window: Duration,
    /// HMAC key for signed URLs
    pub url_signing_secret: Option<String>,
    /// Path or URL prefix of the signed download endpoint
    pub secure_url_base: String,
    /// Bot token used for alert notifications
    pub alert_bot_token: Option<String>,
    /// Chat receiving alert notifications
    pub alert_chat_id: Option<String>,
    pub collections: Collections,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit_window: Duration::from_secs(60),
            max_login_attempts: 5,
            lockout_window: Duration::from_secs(900),
            url_signing_secret: None,
            secure_url_base: "/api/secure".to_string(),
            alert_bot_token: None,
            alert_chat_id: None,
            collections: Collections::default(),
        }
    }
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("rate_limit_window", &self.rate_limit_window)
            .field("max_login_attempts", &self.max_login_attempts)
            .field("lockout_window", &self.lockout_window)
            .field("url_signing_secret", &self.url_signing_secret.as_ref().map(|_| "<redacted>"))
            .field("secure_url_base", &self.secure_url_base)
            .field("alert_bot_token", &self.alert_bot_token.as_ref().map(|_| "<redacted>"))
            .field("alert_chat_id", &self.alert_chat_id)
            .field("collections", &self.collections)
            .finish()
    }
}

impl SecurityConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            rate_limit_window: env_secs("RATE_LIMIT_WINDOW_SECS").unwrap_or(defaults.rate_limit_window),
            max_login_attempts: std::env::var("MAX_LOGIN_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_login_attempts),
            lockout_window: env_secs("LOCKOUT_WINDOW_SECS").unwrap_or(defaults.lockout_window),
            url_signing_secret: env_non_empty("URL_SIGNING_SECRET"),
            secure_url_base: env_non_empty("SECURE_URL_BASE").unwrap_or(defaults.secure_url_base),
            alert_bot_token: env_non_empty("TELEGRAM_BOT_TOKEN"),
            alert_chat_id: env_non_empty("TELEGRAM_ALERT_CHAT_ID"),
            collections: defaults.collections,
        }
    }

    /// Both alert channel settings are present.
    pub fn alerts_enabled(&self) -> bool {
        self.alert_bot_token.is_some() && self.alert_chat_id.is_some()
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    const KEYS: [&str; 7] = [
        "RATE_LIMIT_WINDOW_SECS",
        "MAX_LOGIN_ATTEMPTS",
        "LOCKOUT_WINDOW_SECS",
        "URL_SIGNING_SECRET",
        "SECURE_URL_BASE",
        "TELEGRAM_BOT_TOKEN",
        "TELEGRAM_ALERT_CHAT_ID",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = SecurityConfig::from_env();
        assert_eq!(config.max_login_attempts, 5);
        assert_eq!(config.lockout_window, Duration::from_secs(900));
        assert_eq!(config.secure_url_base, "/api/secure");
        assert!(config.url_signing_secret.is_none());
        assert!(!config.alerts_enabled());
    }

    #[test]
    #[serial]
    fn test_reads_overrides_and_ignores_garbage() {
        clear_env();
        std::env::set_var("MAX_LOGIN_ATTEMPTS", "3");
        std::env::set_var("LOCKOUT_WINDOW_SECS", "not-a-number");
        std::env::set_var("URL_SIGNING_SECRET", "  s3cret  ");
        std::env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
        std::env::set_var("TELEGRAM_ALERT_CHAT_ID", "-100200");

        let config = SecurityConfig::from_env();
        clear_env();

        assert_eq!(config.max_login_attempts, 3);
        assert_eq!(config.lockout_window, Duration::from_secs(900));
        assert_eq!(config.url_signing_secret.as_deref(), Some("s3cret"));
        assert!(config.alerts_enabled());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = SecurityConfig {
            url_signing_secret: Some("s3cret".into()),
            alert_bot_token: Some("123:abc".into()),
            ..SecurityConfig::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("123:abc"));
    }
}
