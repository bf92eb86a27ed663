//! Stored security records.
//!
//! Each record converts to and from a document field map. Fields a record
//! does not know about are kept in `extra` and written back unchanged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use shopfront_firestore::{DocumentData, Fields, NativeValue};

use crate::error::{SecurityError, SecurityResult};

// ============================================================================
// Field helpers
// ============================================================================

fn take(fields: &mut Fields, key: &str) -> SecurityResult<NativeValue> {
    fields
        .remove(key)
        .ok_or_else(|| SecurityError::invalid_record(format!("missing field `{}`", key)))
}

fn take_string(fields: &mut Fields, key: &str) -> SecurityResult<String> {
    match take(fields, key)? {
        NativeValue::String(s) => Ok(s),
        other => Err(wrong_type(key, "string", &other)),
    }
}

fn take_optional_string(fields: &mut Fields, key: &str) -> SecurityResult<Option<String>> {
    match fields.remove(key) {
        None | Some(NativeValue::Null) => Ok(None),
        Some(NativeValue::String(s)) => Ok(Some(s)),
        Some(other) => Err(wrong_type(key, "string", &other)),
    }
}

fn take_i64(fields: &mut Fields, key: &str) -> SecurityResult<i64> {
    let value = take(fields, key)?;
    value.as_i64().ok_or_else(|| wrong_type(key, "integer", &value))
}

fn take_bool(fields: &mut Fields, key: &str) -> SecurityResult<bool> {
    let value = take(fields, key)?;
    value.as_bool().ok_or_else(|| wrong_type(key, "boolean", &value))
}

fn take_timestamp(fields: &mut Fields, key: &str) -> SecurityResult<DateTime<Utc>> {
    let value = take(fields, key)?;
    value
        .as_timestamp()
        .ok_or_else(|| wrong_type(key, "timestamp", &value))
}

fn wrong_type(key: &str, expected: &str, got: &NativeValue) -> SecurityError {
    SecurityError::invalid_record(format!("field `{}` should be a {}, got {:?}", key, expected, got))
}

fn with_extra(mut fields: Fields, extra: &Fields) -> Fields {
    for (key, value) in extra {
        fields.entry(key.clone()).or_insert_with(|| value.clone());
    }
    fields
}

// ============================================================================
// Rate limit window
// ============================================================================

/// Request counter for one identifier and endpoint within one window.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitWindow {
    pub id: Option<String>,
    pub identifier: String,
    pub endpoint: String,
    pub window_start: DateTime<Utc>,
    pub count: u32,
    pub extra: Fields,
}

impl RateLimitWindow {
    pub const IDENTIFIER: &'static str = "identifier";
    pub const ENDPOINT: &'static str = "endpoint";
    pub const WINDOW_START: &'static str = "window_start";
    pub const COUNT: &'static str = "count";

    /// First request of a new window.
    pub fn open(identifier: impl Into<String>, endpoint: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            identifier: identifier.into(),
            endpoint: endpoint.into(),
            window_start: now,
            count: 1,
            extra: Fields::new(),
        }
    }

    /// When this window stops counting.
    pub fn resets_at(&self, window: Duration) -> DateTime<Utc> {
        self.window_start + window
    }

    pub fn to_fields(&self) -> Fields {
        with_extra(
            Fields::from([
                (Self::IDENTIFIER.to_string(), self.identifier.clone().into()),
                (Self::ENDPOINT.to_string(), self.endpoint.clone().into()),
                (Self::WINDOW_START.to_string(), self.window_start.into()),
                (Self::COUNT.to_string(), self.count.into()),
            ]),
            &self.extra,
        )
    }

    pub fn from_document(doc: DocumentData) -> SecurityResult<Self> {
        let mut fields = doc.fields;
        let count = take_i64(&mut fields, Self::COUNT)?;

        Ok(Self {
            id: Some(doc.id),
            identifier: take_string(&mut fields, Self::IDENTIFIER)?,
            endpoint: take_string(&mut fields, Self::ENDPOINT)?,
            window_start: take_timestamp(&mut fields, Self::WINDOW_START)?,
            count: u32::try_from(count.max(0)).unwrap_or(u32::MAX),
            extra: fields,
        })
    }
}

// ============================================================================
// Login attempt
// ============================================================================

/// One entry of the append-only login audit log.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginAttempt {
    pub id: Option<String>,
    pub email: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub extra: Fields,
}

impl LoginAttempt {
    pub const EMAIL: &'static str = "email";
    pub const IP_ADDRESS: &'static str = "ip_address";
    pub const USER_AGENT: &'static str = "user_agent";
    pub const SUCCESS: &'static str = "success";
    pub const TIMESTAMP: &'static str = "timestamp";

    pub fn to_fields(&self) -> Fields {
        with_extra(
            Fields::from([
                (Self::EMAIL.to_string(), self.email.clone().into()),
                (Self::IP_ADDRESS.to_string(), self.ip_address.clone().into()),
                (Self::USER_AGENT.to_string(), self.user_agent.clone().into()),
                (Self::SUCCESS.to_string(), self.success.into()),
                (Self::TIMESTAMP.to_string(), self.timestamp.into()),
            ]),
            &self.extra,
        )
    }

    pub fn from_document(doc: DocumentData) -> SecurityResult<Self> {
        let mut fields = doc.fields;

        Ok(Self {
            id: Some(doc.id),
            email: take_string(&mut fields, Self::EMAIL)?,
            ip_address: take_string(&mut fields, Self::IP_ADDRESS)?,
            user_agent: take_optional_string(&mut fields, Self::USER_AGENT)?,
            success: take_bool(&mut fields, Self::SUCCESS)?,
            timestamp: take_timestamp(&mut fields, Self::TIMESTAMP)?,
            extra: fields,
        })
    }
}

// ============================================================================
// Security alert
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }

    /// High and critical alerts are also pushed out of band.
    pub fn requires_notification(&self) -> bool {
        *self >= AlertSeverity::High
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(AlertSeverity::Low),
            "medium" => Ok(AlertSeverity::Medium),
            "high" => Ok(AlertSeverity::High),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(SecurityError::invalid_record(format!("unknown severity `{}`", other))),
        }
    }
}

/// A persisted security event.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityAlert {
    pub id: Option<String>,
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub metadata: Fields,
    pub timestamp: DateTime<Utc>,
    pub extra: Fields,
}

impl SecurityAlert {
    pub const ALERT_TYPE: &'static str = "type";
    pub const SEVERITY: &'static str = "severity";
    pub const MESSAGE: &'static str = "message";
    pub const METADATA: &'static str = "metadata";
    pub const TIMESTAMP: &'static str = "timestamp";

    pub fn new(
        alert_type: impl Into<String>,
        severity: AlertSeverity,
        message: impl Into<String>,
        metadata: Fields,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            alert_type: alert_type.into(),
            severity,
            message: message.into(),
            metadata,
            timestamp: now,
            extra: Fields::new(),
        }
    }

    pub fn to_fields(&self) -> Fields {
        with_extra(
            Fields::from([
                (Self::ALERT_TYPE.to_string(), self.alert_type.clone().into()),
                (Self::SEVERITY.to_string(), self.severity.as_str().into()),
                (Self::MESSAGE.to_string(), self.message.clone().into()),
                (Self::METADATA.to_string(), NativeValue::Map(self.metadata.clone())),
                (Self::TIMESTAMP.to_string(), self.timestamp.into()),
            ]),
            &self.extra,
        )
    }

    pub fn from_document(doc: DocumentData) -> SecurityResult<Self> {
        let mut fields = doc.fields;

        let metadata = match fields.remove(Self::METADATA) {
            None | Some(NativeValue::Null) => Fields::new(),
            Some(NativeValue::Map(map)) => map,
            Some(other) => return Err(wrong_type(Self::METADATA, "map", &other)),
        };

        Ok(Self {
            id: Some(doc.id),
            alert_type: take_string(&mut fields, Self::ALERT_TYPE)?,
            severity: take_string(&mut fields, Self::SEVERITY)?.parse()?,
            message: take_string(&mut fields, Self::MESSAGE)?,
            metadata,
            timestamp: take_timestamp(&mut fields, Self::TIMESTAMP)?,
            extra: fields,
        })
    }
}
