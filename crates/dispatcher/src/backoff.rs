//! Exponential backoff between attempts of the same envelope

use rand::Rng;
use std::time::Duration;

/// `min(base * 2^(attempt-1), max)`, optionally jittered into `[d/2, d]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let capped = self.capped_delay(attempt);
        if !self.jitter {
            return capped;
        }

        let ms = capped.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(ms / 2..=ms))
    }

    /// Deterministic upper bound for `attempt`
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }
}
