//! Bounded retry for review-tool calls.
//!
//! Delays grow exponentially from `initial_delay` by `backoff_multiplier`,
//! capped at `max_delay`. A multiplier of 1.0 gives a fixed inter-attempt
//! delay, which is what the reopen-after-failed-recreation ladder uses.
//!
//! Every failure is retried: the only caller is an idempotent recovery
//! mutation. Sleeping goes through the [`Clock`] so tests never wait in real
//! time.

use std::time::Duration;

use super::error::GitHubError;
use crate::clock::Clock;

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (cap for exponential growth).
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (1.0 for a fixed delay).
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Reopening the original PR after a failed recreation.
    ///
    /// - 3 attempts in total, 5s apart
    pub const REOPEN: Self = Self {
        max_retries: 2,
        initial_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(5),
        backoff_multiplier: 1.0,
    };

    /// Computes the delay for the given retry attempt (0-indexed).
    ///
    /// The delay grows exponentially: `initial_delay * backoff_multiplier^attempt`,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped_secs)
    }
}

/// Result of a retried operation.
#[derive(Debug)]
pub enum RetryResult<T> {
    /// The operation succeeded.
    Success(T),

    /// Every allowed attempt failed.
    ExhaustedRetries {
        /// The last error encountered.
        last_error: GitHubError,
        /// Number of attempts made (including the initial attempt).
        attempts: u32,
    },
}

/// Executes `operation` with retry.
///
/// `operation` receives the 1-based attempt number.
pub fn retry_with_backoff<T, F>(config: RetryConfig, clock: &dyn Clock, mut operation: F) -> RetryResult<T>
where
    F: FnMut(u32) -> Result<T, GitHubError>,
{
    let max_attempts = config.max_retries + 1; // Include initial attempt

    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation(attempt) {
            Ok(value) => return RetryResult::Success(value),
            Err(e) => {
                if attempt >= max_attempts {
                    return RetryResult::ExhaustedRetries {
                        last_error: e,
                        attempts: attempt,
                    };
                }

                let delay = config.delay_for_attempt(attempt - 1);
                tracing::debug!(
                    attempt,
                    max_attempts,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "retrying after failure"
                );
                clock.sleep(delay);
            }
        }
    }
}
