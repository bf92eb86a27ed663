//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle to render it.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "shopfront_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "shopfront_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "shopfront_http_requests_in_flight";

    pub const RATE_LIMIT_HITS_TOTAL: &str = "shopfront_rate_limit_hits_total";
    pub const SIGNED_URL_REJECTED_TOTAL: &str = "shopfront_signed_url_rejected_total";
    pub const RATE_LIMIT_SWEPT_TOTAL: &str = "shopfront_rate_limit_windows_swept_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, route: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", route.to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_rate_limit_hit(endpoint: &str) {
    counter!(names::RATE_LIMIT_HITS_TOTAL, "endpoint" => endpoint.to_string()).increment(1);
}

/// Record a signed URL that failed verification.
pub fn record_signed_url_rejected(reason: &'static str) {
    counter!(names::SIGNED_URL_REJECTED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_windows_swept(count: usize) {
    counter!(names::RATE_LIMIT_SWEPT_TOTAL).increment(count as u64);
}

/// Metrics middleware for HTTP requests.
///
/// Requests are labelled with the matched route template, not the raw path.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(&method, &route, response.status().as_u16(), start.elapsed().as_secs_f64());

    response
}
