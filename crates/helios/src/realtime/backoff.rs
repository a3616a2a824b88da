//! Reconnect backoff policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default delay before the first reconnect.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(3);

/// Default growth factor between attempts.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Default upper bound on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default number of failed attempts before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Multiplicative backoff with a cap and an optional retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
            max_retries: Some(DEFAULT_MAX_RETRIES),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt, given how many attempts already failed
    /// (`failures >= 1`).
    ///
    /// The first retry waits `base_delay`; each later one multiplies by
    /// `multiplier`, never exceeding `max_delay`.
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.base_delay.as_secs_f64();
        let scaled = base * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        if capped.is_finite() {
            Duration::from_secs_f64(capped.max(0.0))
        } else {
            self.max_delay
        }
    }

    /// Whether `failures` consecutive failures use up the retry budget.
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_retries.is_some_and(|max| failures >= max)
    }
}
