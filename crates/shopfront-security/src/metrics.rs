//! Security service metrics.

use metrics::counter;

use crate::models::AlertSeverity;

pub mod names {
    /// Requests denied by the rate limiter, by endpoint.
    pub const RATE_LIMIT_DENIED_TOTAL: &str = "shopfront_security_rate_limit_denied_total";

    /// Failed login attempts recorded.
    pub const LOGIN_FAILURES_TOTAL: &str = "shopfront_security_login_failures_total";

    /// Accounts that crossed the lockout threshold.
    pub const LOCKOUTS_TOTAL: &str = "shopfront_security_lockouts_total";

    /// Alerts raised, by type and severity.
    pub const ALERTS_TOTAL: &str = "shopfront_security_alerts_total";

    /// Out-of-band alert deliveries that failed.
    pub const NOTIFICATION_FAILURES_TOTAL: &str = "shopfront_security_notification_failures_total";
}

pub fn record_rate_limit_denied(endpoint: &str) {
    counter!(names::RATE_LIMIT_DENIED_TOTAL, "endpoint" => endpoint.to_string()).increment(1);
}

pub fn record_login_failure() {
    counter!(names::LOGIN_FAILURES_TOTAL).increment(1);
}

pub fn record_lockout() {
    counter!(names::LOCKOUTS_TOTAL).increment(1);
}

pub fn record_alert(alert_type: &str, severity: AlertSeverity) {
    counter!(
        names::ALERTS_TOTAL,
        "type" => alert_type.to_string(),
        "severity" => severity.as_str()
    )
    .increment(1);
}

pub fn record_notification_failure(severity: AlertSeverity) {
    counter!(names::NOTIFICATION_FAILURES_TOTAL, "severity" => severity.as_str()).increment(1);
}
