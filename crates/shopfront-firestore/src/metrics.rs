//! Document store metrics.
//!
//! Requests are labelled by operation, collection and upstream status so a
//! misbehaving collection (e.g. a hot rate-limit window) stands out.

use std::time::Duration;

use metrics::{counter, histogram};

pub mod names {
    /// Document requests by operation, collection and status.
    pub const REQUESTS_TOTAL: &str = "shopfront_firestore_requests_total";

    /// Request latency by operation.
    pub const REQUEST_DURATION_SECONDS: &str = "shopfront_firestore_request_duration_seconds";

    /// Retried attempts of idempotent calls by operation.
    pub const RETRIES_TOTAL: &str = "shopfront_firestore_retries_total";

    /// Token exchanges by outcome (`ok` / `error`).
    pub const TOKEN_MINTS_TOTAL: &str = "shopfront_firestore_token_mints_total";
}

/// Record a finished request. `status` is the upstream HTTP status, or `0`
/// when the failure carries none (transport or decode errors).
pub fn record_request(operation: &str, collection: &str, status: u16, elapsed: Duration) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "collection" => collection.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(names::REQUEST_DURATION_SECONDS, "operation" => operation.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_retry(operation: &str) {
    counter!(names::RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

pub fn record_token_mint(ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!(names::TOKEN_MINTS_TOTAL, "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_share_prefix() {
        for name in [
            names::REQUESTS_TOTAL,
            names::REQUEST_DURATION_SECONDS,
            names::RETRIES_TOTAL,
            names::TOKEN_MINTS_TOTAL,
        ] {
            assert!(name.starts_with("shopfront_firestore_"), "{}", name);
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_request("get_document", "rate_limits", 200, Duration::from_millis(12));
        record_retry("run_query");
        record_token_mint(false);
    }
}
