//! Polling for remote state that becomes available eventually
//!
//! A token file appears some seconds after the k3s server starts, a webhook
//! deployment takes a while to roll out. [`retry_with_policy`] re-runs an
//! operation until it succeeds or the policy's attempts are used up.

use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// How often and how far apart to retry
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of invocations, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub delay: Duration,

    /// Optional exponential growth of the delay
    pub backoff: Option<Backoff>,
}

/// Exponential backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Fixed delay between attempts
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: None,
        }
    }

    pub fn with_backoff(mut self, multiplier: f64, max_delay: Duration) -> Self {
        self.backoff = Some(Backoff {
            multiplier,
            max_delay,
        });
        self
    }

    /// Delay slept after failed attempt number `attempt` (1-based).
    ///
    /// Never exceeds `max_delay`; a nonsensical multiplier yields zero rather
    /// than an unrepresentable duration.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        match &self.backoff {
            None => self.delay,
            Some(backoff) => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let factor = backoff.multiplier.powi(exponent);
                let secs = (self.delay.as_secs_f64() * factor)
                    .min(backoff.max_delay.as_secs_f64())
                    .max(0.0);
                Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(10, Duration::from_secs(5))
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` invocations fail.
///
/// There is no distinction between "not ready yet" and "broken": every error
/// is retried, and after the last attempt the last error is returned. No delay
/// follows the final attempt.
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "Giving up after {} attempts", attempt
                    );
                    return Err(e);
                }

                let delay = policy.delay_before(attempt);
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Not ready yet, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
