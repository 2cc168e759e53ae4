//! Bounded exponential backoff with jitter

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// `delay(n) = min(base * 2^n + jitter, max)`, at most `max_attempts`
/// transfer calls per payout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of the uniform jitter added to each delay
    pub max_jitter_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_jitter_ms: 250,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based) without jitter
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Delay before retry number `retry` (0-based), jitter included
    pub fn delay_for(&self, retry: u32) -> Duration {
        let jitter = if self.max_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.max_jitter_ms)
        };
        let delay = self.base_delay(retry).as_millis() as u64 + jitter;
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// `attempts` transfer calls already made use up the budget
    pub fn is_exhausted(&self, attempts: i32) -> bool {
        attempts >= self.max_attempts as i32
    }
}
