//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Exponential backoff with a cap.
///
/// `delay = min(base_delay * multiplier^error_count, max_delay)`
///
/// There is no jitter: the delay never decreases as `error_count` grows.
/// Fields are only set through `new`, which clamps them.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    base_delay: Duration,

    /// Growth factor per additional failure (>= 1.0).
    multiplier: f64,

    /// Upper bound for any single delay.
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier: multiplier.max(1.0),
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay before the next attempt, given the failures recorded so far.
    ///
    /// With base_delay=2s, multiplier=2.0:
    /// - error_count 0 (first failure): 2s
    /// - error_count 1: 4s
    /// - error_count 2: 8s
    pub fn next_delay(&self, error_count: u32) -> Duration {
        let exponent = i32::try_from(error_count).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max_secs {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), 2.0, Duration::from_secs(3600))
    }
}
