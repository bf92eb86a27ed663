//! Service-account credential loading.
//!
//! The credential is resolved from the process environment on every call to
//! [`ServiceAccountCredential::from_env`]. Two sources are tried in order:
//! a single base64-encoded service account JSON blob, then three discrete
//! variables. Nothing is read from disk or the network.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use tracing::warn;

use crate::error::{FirestoreError, FirestoreResult};

/// Base64-encoded service account JSON.
pub const ENV_SERVICE_ACCOUNT_BLOB: &str = "FIREBASE_SERVICE_ACCOUNT_BASE64";
/// Service account email (discrete form).
pub const ENV_CLIENT_EMAIL: &str = "FIREBASE_CLIENT_EMAIL";
/// PEM private key, usually with literal `\n` sequences (discrete form).
pub const ENV_PRIVATE_KEY: &str = "FIREBASE_PRIVATE_KEY";
/// Project id (discrete form).
pub const ENV_PROJECT_ID: &str = "FIREBASE_PROJECT_ID";
/// Accepted when `FIREBASE_PROJECT_ID` is unset.
pub const ENV_PROJECT_ID_FALLBACK: &str = "GCP_PROJECT_ID";

/// Service-account identity used to mint access tokens.
///
/// `Debug` never prints the private key.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceAccountCredential {
    principal_email: String,
    private_key_pem: String,
    tenant_id: String,
}

/// Subset of the service account JSON we care about.
#[derive(Deserialize)]
struct ServiceAccountBlob {
    client_email: Option<String>,
    private_key: Option<String>,
    project_id: Option<String>,
}

impl ServiceAccountCredential {
    pub fn new(
        principal_email: impl Into<String>,
        private_key_pem: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            principal_email: principal_email.into(),
            private_key_pem: private_key_pem.into(),
            tenant_id: tenant_id.into(),
        }
    }

    pub fn principal_email(&self) -> &str {
        &self.principal_email
    }

    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }

    /// Project (tenant) id the credential belongs to.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Load the credential from process environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load the credential using an arbitrary variable lookup.
    ///
    /// Fails closed: a credential is only returned when one source is
    /// complete.
    pub fn load_with<F>(lookup: F) -> FirestoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(blob) = non_empty(lookup(ENV_SERVICE_ACCOUNT_BLOB)) {
            match Self::from_blob(&blob) {
                Ok(credential) => return Ok(credential),
                Err(e) => warn!(
                    variable = ENV_SERVICE_ACCOUNT_BLOB,
                    "Ignoring unusable service account blob: {}", e
                ),
            }
        }

        Self::from_discrete(&lookup)
    }

    fn from_blob(encoded: &str) -> FirestoreResult<Self> {
        let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
            FirestoreError::missing_credential(format!("service account blob is not base64: {}", e))
        })?;
        let blob: ServiceAccountBlob = serde_json::from_slice(&bytes).map_err(|e| {
            FirestoreError::missing_credential(format!("service account blob is not JSON: {}", e))
        })?;

        match (
            non_empty(blob.client_email),
            non_empty(blob.private_key),
            non_empty(blob.project_id),
        ) {
            (Some(email), Some(key), Some(project)) => {
                Ok(Self::new(email, unescape_newlines(&key), project))
            }
            _ => Err(FirestoreError::missing_credential(
                "service account blob lacks client_email, private_key or project_id",
            )),
        }
    }

    fn from_discrete<F>(lookup: &F) -> FirestoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let email = non_empty(lookup(ENV_CLIENT_EMAIL));
        let key = non_empty(lookup(ENV_PRIVATE_KEY));
        let project = non_empty(lookup(ENV_PROJECT_ID))
            .or_else(|| non_empty(lookup(ENV_PROJECT_ID_FALLBACK)));

        match (email, key, project) {
            (Some(email), Some(key), Some(project)) => {
                Ok(Self::new(email, unescape_newlines(&key), project))
            }
            (email, key, project) => {
                let missing: Vec<&str> = [
                    (email.is_none(), ENV_CLIENT_EMAIL),
                    (key.is_none(), ENV_PRIVATE_KEY),
                    (project.is_none(), ENV_PROJECT_ID),
                ]
                .into_iter()
                .filter_map(|(absent, name)| absent.then_some(name))
                .collect();

                Err(FirestoreError::missing_credential(format!(
                    "{} not set and discrete credential is incomplete (missing {})",
                    ENV_SERVICE_ACCOUNT_BLOB,
                    missing.join(", ")
                )))
            }
        }
    }
}

impl fmt::Debug for ServiceAccountCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountCredential")
            .field("principal_email", &self.principal_email)
            .field("private_key_pem", &"[REDACTED]")
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}

/// Env files usually carry the PEM on one line with literal `\n`.
fn unescape_newlines(pem: &str) -> String {
    pem.replace("\\n", "\n")
}
