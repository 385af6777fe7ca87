//! Exponential retry backoff.

use crate::TrackerConfig;
use rand::Rng;
use std::time::Duration;

/// Delay schedule between delivery attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
            jitter: false,
        }
    }

    /// Add up to 25% random extra delay to each step.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_ceiling_ms),
        )
        .with_jitter(config.backoff_jitter)
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Wait before the retry that follows failed attempt `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)`, capped at the ceiling. Jitter only ever adds
    /// to the uncapped value, so the schedule keeps increasing until it
    /// reaches the ceiling.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let raw = self.base.saturating_mul(1u32 << exponent);

        let delay = if self.jitter {
            let spread = u64::try_from(raw.as_millis() / 4).unwrap_or(u64::MAX);
            let extra = rand::thread_rng().gen_range(0..=spread);
            raw.saturating_add(Duration::from_millis(extra))
        } else {
            raw
        };
        delay.min(self.ceiling)
    }
}
