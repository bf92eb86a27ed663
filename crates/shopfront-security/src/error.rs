//! Security service error types.

use shopfront_firestore::FirestoreError;
use thiserror::Error;

pub type SecurityResult<T> = Result<T, SecurityError>;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Store error: {0}")]
    Store(#[from] FirestoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A stored record is missing a field or has the wrong type.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Notification failed: {0}")]
    Notification(String),
}

impl SecurityError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    pub fn notification(msg: impl Into<String>) -> Self {
        Self::Notification(msg.into())
    }
}

/// The request URL is dropped: notifier URLs can carry a bot token.
impl From<reqwest::Error> for SecurityError {
    fn from(e: reqwest::Error) -> Self {
        Self::Notification(e.without_url().to_string())
    }
}
