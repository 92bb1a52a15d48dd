//! Reconnect policy for the live subscription.

use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 0 retries forever.
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

pub trait BackoffPolicy {
    fn delay_for_attempt(&self, attempt: usize) -> Duration;
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` consecutive failures.
    pub fn allows(&self, attempt: usize) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }
}

impl BackoffPolicy for RetryPolicy {
    /// Doubles from `base_backoff_ms` on each consecutive failure (attempt 1
    /// waits the base delay), capped at `max_backoff_ms`.
    fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as u32;
        let delay = self
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }
}
