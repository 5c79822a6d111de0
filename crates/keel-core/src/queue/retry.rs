//! Retry policy: decides backoff delays for rate-limited requeues.

use std::time::Duration;

/// Exponential backoff keyed by the consecutive-failure count of one key.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Backoff multiplier. Values below 1.0 are treated as 1.0.
    pub multiplier: f64,

    /// Upper bound for any computed delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
        }
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    ///
    /// delay = min(base_delay * multiplier^(failures - 1), max_delay)
    ///
    /// Example with base_delay=5ms, multiplier=2.0:
    /// - failure 1: 5ms
    /// - failure 2: 10ms
    /// - failure 3: 20ms
    /// - ... until max_delay
    pub fn next_delay(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let max_secs = self.max_delay.as_secs_f64();
        let delay_secs = self.base_delay.as_secs_f64() * multiplier.powi(exponent);
        if delay_secs.is_finite() && delay_secs < max_secs {
            Duration::from_secs_f64(delay_secs)
        } else {
            self.max_delay
        }
    }
}

impl Default for RetryPolicy {
    /// 5ms doubling up to 1000s.
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1000),
        }
    }
}
