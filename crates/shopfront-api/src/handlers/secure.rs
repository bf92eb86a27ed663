//! Signed download endpoint.
//!
//! `GET /api/secure?path=&expires=&sig=` redirects to the asset origin when
//! the signature is valid and unexpired. The query string is the whole
//! authorization.

use axum::extract::{Query, State};
use axum::response::Redirect;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Longest object path accepted for a signed download.
const MAX_PATH_LENGTH: usize = 1024;

#[derive(Debug, Deserialize)]
pub struct SecureDownloadParams {
    pub path: Option<String>,
    pub expires: Option<i64>,
    pub sig: Option<String>,
}

pub async fn secure_download(
    State(state): State<AppState>,
    Query(params): Query<SecureDownloadParams>,
) -> ApiResult<Redirect> {
    let (Some(path), Some(expires), Some(sig)) = (params.path, params.expires, params.sig) else {
        return Err(ApiError::bad_request("path, expires and sig are required"));
    };

    if !is_valid_object_path(&path) {
        metrics::record_signed_url_rejected("invalid_path");
        return Err(ApiError::bad_request("Invalid path"));
    }

    let now = Utc::now().timestamp();
    if now >= expires {
        metrics::record_signed_url_rejected("expired");
        debug!(path = %path, expires, "Signed URL expired");
        return Err(ApiError::forbidden("Link expired"));
    }

    if !state.security.url_signer.verify_at(&path, expires, &sig, now) {
        metrics::record_signed_url_rejected("invalid_signature");
        warn!(path = %path, "Signed URL signature mismatch");
        return Err(ApiError::forbidden("Invalid signature"));
    }

    Ok(Redirect::temporary(&asset_url(&state.config.asset_origin, &path)))
}

/// Relative object key without traversal or empty segments.
fn is_valid_object_path(path: &str) -> bool {
    !path.is_empty()
        && path.len() <= MAX_PATH_LENGTH
        && !path.starts_with('/')
        && !path.contains('\\')
        && !path.chars().any(char::is_control)
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

/// Origin URL for `path`, encoding each segment but keeping the separators.
fn asset_url(origin: &str, path: &str) -> String {
    let encoded: Vec<String> = path
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("{}/{}", origin.trim_end_matches('/'), encoded.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_path_validation() {
        assert!(is_valid_object_path("invoices/2025/001.pdf"));
        assert!(is_valid_object_path("a.png"));

        assert!(!is_valid_object_path(""));
        assert!(!is_valid_object_path("/etc/passwd"));
        assert!(!is_valid_object_path("a/../../secret"));
        assert!(!is_valid_object_path("a//b"));
        assert!(!is_valid_object_path("a\\b"));
        assert!(!is_valid_object_path("a\nb"));
    }

    #[test]
    fn test_asset_url_encodes_segments() {
        assert_eq!(
            asset_url("https://assets.shop.test/", "downloads/my file.zip"),
            "https://assets.shop.test/downloads/my%20file.zip"
        );
    }
}
