//! Axum HTTP service for shopfront security.
//!
//! This crate provides:
//! - Signed, rate-limited download redirects
//! - Login attempt reporting with account lockout
//! - Health, readiness and Prometheus metrics endpoints
//! - A background sweep of expired rate-limit windows

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::RateLimitSweeper;
pub use state::AppState;
