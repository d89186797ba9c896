//! Retry policy for notifier sends — linear backoff in whole seconds.

use std::future::Future;
use std::time::Duration;

use crate::error::{Result, TrackerError};

/// Bounded retry with increasing backoff.
///
/// Attempt `n` (1-based) that fails is followed by a sleep of
/// `base_delay * n`, except after the final attempt. With the defaults
/// (3 attempts, 1s base) that is 1s, then 2s, then give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Self::DEFAULT_BASE_DELAY,
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Effective attempt budget; zero is treated as a single attempt.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Backoff to sleep after failed attempt `attempt`, or `None` when it was the last one.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.attempts() {
            None
        } else {
            Some(self.base_delay * attempt)
        }
    }

    /// Run `op` until it succeeds or the budget is spent.
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("✅ {label} succeeded on attempt {attempt}/{attempts}");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!("⚠️ {label} failed ({attempt}/{attempts}): {e}");
                    last_error = e.to_string();
                    if let Some(delay) = self.delay_after(attempt) {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(TrackerError::SendFailed {
            attempts,
            reason: last_error,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
