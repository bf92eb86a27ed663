//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{health, ready, record_login_attempt, secure_download};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    rate_limit_middleware, request_id, request_logging, require_internal_token, security_headers,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    // Public signed downloads, limited per client address
    let secure_routes = Router::new()
        .route("/secure", get(secure_download))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware));

    // Internal: identity provider only. Credentials are checked before the
    // limiter so unauthenticated calls never touch the store.
    let auth_routes = Router::new()
        .route("/auth/attempts", post(record_login_attempt))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), require_internal_token));

    let api_routes = Router::new().merge(secure_routes).merge(auth_routes);

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .with_state(state)
}
