//! Login attempt reporting.
//!
//! The identity provider calls this after every password check, presenting
//! the internal bearer token. A locked account gets the same 401 as a wrong
//! password.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::middleware::client_ip;
use crate::state::AppState;

/// Longest email accepted.
const MAX_EMAIL_LENGTH: usize = 320;

#[derive(Debug, Deserialize)]
pub struct LoginAttemptRequest {
    pub email: String,
    pub success: bool,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginAttemptResponse {
    pub failures: u32,
    pub remaining_attempts: u32,
}

pub async fn record_login_attempt(
    State(state): State<AppState>,
    request: Request<Body>,
) -> ApiResult<(StatusCode, Json<LoginAttemptResponse>)> {
    let ip_address = client_ip(&request, &state.config.trusted_proxies)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let header_agent = request
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let limit = state.config.max_body_size;
    let bytes = axum::body::to_bytes(request.into_body(), limit)
        .await
        .map_err(|_| ApiError::bad_request("Request body too large"))?;
    let body: LoginAttemptRequest = serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e)))?;

    let email = body.email.trim();
    if email.is_empty() || email.len() > MAX_EMAIL_LENGTH || !email.contains('@') {
        return Err(ApiError::bad_request("Invalid email"));
    }

    let user_agent = body.user_agent.or(header_agent);
    let status = state
        .security
        .login_guard
        .record_attempt(email, &ip_address, user_agent.as_deref(), body.success)
        .await?;

    if status.locked {
        info!(ip = %ip_address, failures = status.failures, "Rejecting login for locked account");
        return Err(ApiError::invalid_credentials());
    }

    Ok((
        StatusCode::OK,
        Json(LoginAttemptResponse {
            failures: status.failures,
            remaining_attempts: status.threshold.saturating_sub(status.failures),
        }),
    ))
}
