//! Retry driver with exponential backoff.
//!
//! Runs an operation under a bounded-attempt policy. A retriable failure
//! waits `base_delay * multiplier^k` for zero-indexed attempt `k`, then
//! retries; a non-retriable failure or exhaustion of attempts surfaces
//! immediately. `max_attempts = 0` means exactly one attempt, no retry.

use std::time::Duration;

use crate::delay::{default_delayer, SharedDelayer};
use crate::error::{PanelError, Result};

/// Retry policy: bounded attempts, exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(100), multiplier: 2.0 }
    }
}

impl RetryPolicy {
    /// Delay to wait before the zero-indexed attempt `k` (i.e. before the
    /// `(k+1)`-th call), `base_delay * multiplier^k`.
    pub fn delay_for_attempt(&self, k: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(k as i32);
        Duration::from_secs_f64(scaled.max(0.0))
    }
}

/// Executes an async operation under a [`RetryPolicy`], using a pluggable
/// [`Delayer`](crate::delay::Delayer) so hosts can substitute a test clock.
pub struct RetryDriver {
    policy: RetryPolicy,
    delayer: SharedDelayer,
}

impl RetryDriver {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, delayer: default_delayer() }
    }

    pub fn with_delayer(policy: RetryPolicy, delayer: SharedDelayer) -> Self {
        Self { policy, delayer }
    }

    /// Run `op` until it succeeds, exhausts attempts, or fails with a
    /// non-retriable error. `op` is re-invoked from scratch on every attempt.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.policy.max_attempts {
                        return Err(err);
                    }
                    let wait = self.policy.delay_for_attempt(attempt);
                    self.delayer.delay(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}
