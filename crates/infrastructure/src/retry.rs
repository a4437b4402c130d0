//! Retry with exponential backoff
//!
//! Used by outbound adapters (webhook delivery) for transient failures.
//!
//! # Example
//!
//! ```rust,ignore
//! use infrastructure::retry::{RetryConfig, with_retry};
//!
//! let outcome = with_retry(&RetryConfig::default(), || async {
//!     client.post(url).send().await
//! }).await;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound on any delay in milliseconds
    pub max_delay_ms: u64,
    /// Growth factor between attempts
    pub multiplier: f64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Relative jitter applied to each delay, `0.0` disables it
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            multiplier: 2.0,
            max_retries: 3,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Disable jitter
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Delay before retry number `attempt` (0-indexed)
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss,
        clippy::cast_possible_truncation
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = (self.initial_delay_ms as f64) * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay_ms as f64);
        let delay = if self.jitter_factor > 0.0 {
            let range = capped * self.jitter_factor;
            (capped + rand::rng().random_range(-range..=range)).max(0.0)
        } else {
            capped
        };
        Duration::from_millis(delay as u64)
    }
}

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    /// Whether the operation should be retried
    fn is_retryable(&self) -> bool;
}

/// Run `operation` until it succeeds, fails permanently or retries run out
///
/// Returns the final result and the number of attempts made.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> (Result<T, E>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(attempts, "Operation succeeded after retries");
                }
                return (Ok(value), attempts);
            },
            Err(err) if !err.is_retryable() => {
                debug!(attempts, error = %err, "Operation failed permanently");
                return (Err(err), attempts);
            },
            Err(err) if attempts > config.max_retries => {
                warn!(attempts, error = %err, "Operation failed after max retries");
                return (Err(err), attempts);
            },
            Err(err) => {
                let delay = config.delay_for_attempt(attempts - 1);
                warn!(
                    attempt = attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            },
        }
    }
}
