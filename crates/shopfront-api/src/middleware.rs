//! HTTP middleware.

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, MatchedPath, State};
use axum::http::{header, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, warn, Span};
use uuid::Uuid;

use crate::error::ApiError;
use crate::metrics;
use crate::config::TrustedProxy;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Add security headers to every response.
pub async fn security_headers(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));

    response
}

/// Propagate or assign an `X-Request-ID`.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("X-Request-ID")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(request_id.clone());
    Span::current().record("request_id", request_id.as_str());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-ID", value);
    }

    response
}

pub async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    // Query strings are not logged: signed URLs carry their signature there.
    if path != "/health" && path != "/ready" {
        info!(
            method = %method,
            path = %path,
            status = %response.status(),
            duration_ms = %start.elapsed().as_millis(),
            "Request completed"
        );
    }

    response
}

/// Per-client-address rate limit backed by the document store.
///
/// A store failure lets the request through: availability of downloads is
/// preferred over strict limiting when the store is unreachable.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let identifier = client_ip(&request, &state.config.trusted_proxies)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    match state
        .security
        .rate_limiter
        .check(&identifier, &endpoint, state.config.secure_rate_limit)
        .await
    {
        Ok(decision) if !decision.allowed => {
            warn!(ip = %identifier, endpoint = %endpoint, "Rate limit exceeded");
            metrics::record_rate_limit_hit(&endpoint);
            return ApiError::RateLimited {
                retry_after_secs: decision.retry_after_secs(Utc::now()),
                reset_at: decision.reset_at,
            }
            .into_response();
        }
        Ok(decision) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
            headers.insert("X-RateLimit-Reset", HeaderValue::from(decision.reset_at.timestamp()));
            response
        }
        Err(e) => {
            warn!(ip = %identifier, endpoint = %endpoint, "Rate limit check failed, allowing request: {}", e);
            next.run(request).await
        }
    }
}

/// Require `Authorization: Bearer <INTERNAL_API_TOKEN>` on internal routes.
///
/// Without a configured token every request is rejected.
pub async fn require_internal_token(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.internal_api_token.as_deref() else {
        warn!("INTERNAL_API_TOKEN is not configured, rejecting internal request");
        return ApiError::unauthorized("Missing or invalid credentials").into_response();
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if tokens_match(token, expected) => next.run(request).await,
        _ => {
            warn!(path = %request.uri().path(), "Rejected internal request with bad credentials");
            ApiError::unauthorized("Missing or invalid credentials").into_response()
        }
    }
}

/// Constant-time comparison: MAC the expected token and verify the
/// presented one against it.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let Ok(mut expected_mac) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    expected_mac.update(expected.as_bytes());
    let expected_tag = expected_mac.finalize().into_bytes();

    let Ok(mut presented_mac) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    presented_mac.update(presented.as_bytes());
    presented_mac.verify_slice(&expected_tag).is_ok()
}

/// Resolve the client address for a request.
///
/// The TCP peer is authoritative unless it is a trusted proxy. Behind a
/// trusted proxy, `X-Forwarded-For` is walked right to left and the first
/// hop that is not itself a trusted proxy wins; `X-Real-IP` is used only
/// when no `X-Forwarded-For` is present.
pub fn client_ip(request: &Request<Body>, trusted: &[TrustedProxy]) -> Option<IpAddr> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())?;

    let is_trusted = |ip: IpAddr| trusted.iter().any(|p| p.contains(ip));
    if !is_trusted(peer) {
        return Some(peer);
    }

    let forwarded: Vec<&str> = request
        .headers()
        .get_all("X-Forwarded-For")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if !forwarded.is_empty() {
        let mut client = peer;
        for hop in forwarded.iter().rev() {
            let Ok(ip) = hop.parse::<IpAddr>() else {
                break;
            };
            client = ip;
            if !is_trusted(ip) {
                break;
            }
        }
        return Some(client);
    }

    request
        .headers()
        .get("X-Real-IP")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
        .or(Some(peer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_from(peer: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/secure");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        let peer: SocketAddr = format!("{}:40000", peer).parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));
        request
    }

    fn proxies(list: &[&str]) -> Vec<TrustedProxy> {
        list.iter().map(|p| p.parse().unwrap()).collect()
    }

    #[test]
    fn test_untrusted_peer_ignores_forwarding_headers() {
        let request = request_from(
            "198.51.100.9",
            &[("X-Forwarded-For", "203.0.113.7"), ("X-Real-IP", "203.0.113.8")],
        );
        assert_eq!(client_ip(&request, &[]), Some("198.51.100.9".parse().unwrap()));
        assert_eq!(
            client_ip(&request, &proxies(&["10.0.0.0/8"])),
            Some("198.51.100.9".parse().unwrap())
        );
    }

    #[test]
    fn test_trusted_peer_takes_rightmost_untrusted_hop() {
        let trusted = proxies(&["10.0.0.0/8"]);
        let request = request_from(
            "10.0.0.2",
            &[("X-Forwarded-For", "1.2.3.4, 203.0.113.7, 10.0.0.1")],
        );
        // 1.2.3.4 is whatever the client claimed; 203.0.113.7 reached our proxy.
        assert_eq!(client_ip(&request, &trusted), Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn test_trusted_peer_stops_at_garbage_hop() {
        let trusted = proxies(&["10.0.0.0/8"]);
        let request = request_from("10.0.0.2", &[("X-Forwarded-For", "203.0.113.7, garbage, 10.0.0.1")]);
        assert_eq!(client_ip(&request, &trusted), Some("10.0.0.1".parse().unwrap()));

        let request = request_from("10.0.0.2", &[("X-Forwarded-For", "garbage")]);
        assert_eq!(client_ip(&request, &trusted), Some("10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn test_real_ip_only_behind_trusted_proxy() {
        let trusted = proxies(&["10.0.0.0/8"]);
        let request = request_from("10.0.0.2", &[("X-Real-IP", "2001:db8::1")]);
        assert_eq!(client_ip(&request, &trusted), Some("2001:db8::1".parse().unwrap()));

        let request = request_from("10.0.0.2", &[]);
        assert_eq!(client_ip(&request, &trusted), Some("10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn test_no_connect_info_yields_none() {
        let request = Request::builder()
            .header("X-Forwarded-For", "203.0.113.7")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request, &[]), None);
    }

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("idp-secret", "idp-secret"));
        assert!(!tokens_match("idp-secreT", "idp-secret"));
        assert!(!tokens_match("", "idp-secret"));
        assert!(!tokens_match("idp-secret-longer", "idp-secret"));
    }
}
