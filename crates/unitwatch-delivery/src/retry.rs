//! Retry policy for notification delivery
//!
//! Exponential backoff without jitter: one notification per invocation means
//! there is no herd to spread out, and deterministic delays keep the total
//! time budget predictable.
//!
//! `delay(n) = initial_delay * backoff_factor^(n - 1)`, capped at `max_delay`,
//! for retry `n >= 1`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use unitwatch_core::limits::{
    INITIAL_RETRY_DELAY, MAX_DELIVERY_RETRIES, MAX_RETRY_DELAY, RETRY_BACKOFF_FACTOR,
};
use unitwatch_core::{Error, Result};

/// Configuration for delivery retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = single attempt)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Cap for exponential growth, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier applied per retry
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Total number of attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before attempt `attempt` (0-indexed; attempt 0 has none)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = delay_ms.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Check the values make sense
    pub fn validate(&self) -> Result<()> {
        if self.backoff_factor < 1.0 || !self.backoff_factor.is_finite() {
            return Err(Error::config(format!(
                "retry backoff factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(Error::config(format!(
                "retry max delay ({}ms) is below the initial delay ({}ms)",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        Ok(())
    }
}

/// Sleep for `delay` unless `cancel` fires first
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

fn default_max_retries() -> u32 {
    MAX_DELIVERY_RETRIES
}

fn default_initial_delay_ms() -> u64 {
    INITIAL_RETRY_DELAY.as_millis() as u64
}

fn default_max_delay_ms() -> u64 {
    MAX_RETRY_DELAY.as_millis() as u64
}

fn default_backoff_factor() -> f64 {
    RETRY_BACKOFF_FACTOR
}
