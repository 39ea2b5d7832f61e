use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Retry behavior for a job type: bounded attempts with exponential
/// backoff. Attempts count executions, so `max_attempts: 3` means the
/// job runs at most three times before landing in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total execution attempts allowed, including the first
    pub max_attempts: u32,

    /// Delay before the first retry; each further retry doubles it
    pub base_delay_ms: u64,

    /// Backoff ceiling
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60 * 60 * 1_000,
        }
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms: 60 * 60 * 1_000,
        }
    }

    /// No retries: one attempt, then `Failed`.
    pub const fn none() -> Self {
        Self::new(1, 0)
    }

    /// Backoff after the given number of completed attempts:
    /// `base * 2^(attempt - 1)`, capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::milliseconds(ms as i64)
    }

    /// Wall-clock time the next attempt becomes eligible.
    pub fn retry_at(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.delay_for(attempt)
    }

    /// Whether another attempt is allowed after `attempt` executions.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
