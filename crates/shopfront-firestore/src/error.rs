//! Firestore error types.

use thiserror::Error;

/// Result type for Firestore operations.
pub type FirestoreResult<T> = Result<T, FirestoreError>;

/// Errors that can occur during Firestore operations.
#[derive(Debug, Error)]
pub enum FirestoreError {
    /// Service-account configuration is absent or incomplete.
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// Minting or exchanging the access token failed.
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Write failed ({status}): {body}")]
    WriteFailure { status: u16, body: String },

    #[error("Read failed ({status}): {body}")]
    ReadFailure { status: u16, body: String },

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FirestoreError {
    pub fn missing_credential(msg: impl Into<String>) -> Self {
        Self::MissingCredential(msg.into())
    }

    pub fn auth_failure(msg: impl Into<String>) -> Self {
        Self::AuthFailure(msg.into())
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn write_failure(status: u16, body: impl Into<String>) -> Self {
        Self::WriteFailure {
            status,
            body: body.into(),
        }
    }

    pub fn read_failure(status: u16, body: impl Into<String>) -> Self {
        Self::ReadFailure {
            status,
            body: body.into(),
        }
    }

    /// Upstream HTTP status, when the error came from a response.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            FirestoreError::WriteFailure { status, .. } | FirestoreError::ReadFailure { status, .. } => {
                Some(*status)
            }
            FirestoreError::NotFound(_) => Some(404),
            FirestoreError::AuthFailure(_) => Some(401),
            FirestoreError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Check if error is retryable.
    ///
    /// Auth and credential failures are never retried here; the caller decides.
    pub fn is_retryable(&self) -> bool {
        match self {
            FirestoreError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FirestoreError::WriteFailure { status, .. } | FirestoreError::ReadFailure { status, .. } => {
                *status == 429 || *status >= 500
            }
            _ => false,
        }
    }

    /// True for errors that must abort the calling operation outright.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FirestoreError::MissingCredential(_) | FirestoreError::AuthFailure(_)
        )
    }
}
