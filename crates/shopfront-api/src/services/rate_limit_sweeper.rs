//! Periodic removal of expired rate-limit windows.
//!
//! Window records are superseded rather than deleted when a new window
//! starts, so they accumulate until swept.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use shopfront_security::RateLimiter;

use crate::metrics;

pub struct RateLimitSweeper {
    limiter: Arc<RateLimiter>,
    interval: Duration,
    enabled: bool,
}

impl RateLimitSweeper {
    pub fn new(limiter: Arc<RateLimiter>, interval: Duration) -> Self {
        let enabled = std::env::var("ENABLE_RATE_LIMIT_SWEEP")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        Self {
            limiter,
            interval,
            enabled,
        }
    }

    /// Run forever. Spawn this as a background task.
    pub async fn run(&self) {
        if !self.enabled {
            info!("Rate-limit sweep is disabled");
            return;
        }

        info!("Starting rate-limit sweeper (interval: {:?})", self.interval);

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Err(e) = self.sweep_once().await {
                error!("Rate-limit sweep error: {}", e);
            }
        }
    }

    /// Delete expired windows once and return how many were removed.
    pub async fn sweep_once(&self) -> anyhow::Result<usize> {
        let removed = self.limiter.sweep_expired(Utc::now()).await?;
        if removed > 0 {
            metrics::record_windows_swept(removed);
            info!("Swept {} expired rate-limit windows", removed);
        }
        Ok(removed)
    }
}
