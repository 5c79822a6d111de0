//! Clock port - 時刻の抽象化
//!
//! The leader gate reads time only through this trait so tests can inject
//! skew and stalls.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::lease::add_std;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall-clock anchored at construction, advanced by the tokio monotonic
/// clock. Immune to wall-clock jumps, and follows `tokio::time::pause`.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    anchor_wall: DateTime<Utc>,
    anchor: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            anchor_wall: Utc::now(),
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        add_std(self.anchor_wall, self.anchor.elapsed())
    }
}

/// Manually driven clock for tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = add_std(*now, by);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Wraps another clock and shifts it by a fixed offset (simulated skew).
pub struct SkewedClock<C> {
    inner: C,
    offset: chrono::Duration,
}

impl<C: Clock> SkewedClock<C> {
    pub fn new(inner: C, offset: chrono::Duration) -> Self {
        Self { inner, offset }
    }
}

impl<C: Clock> Clock for SkewedClock<C> {
    fn now(&self) -> DateTime<Utc> {
        let now = self.inner.now();
        now.checked_add_signed(self.offset).unwrap_or(now)
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances() {
        let start = Utc::now();
        let clock = FixedClock::new(start);
        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(10));
    }

    #[test]
    fn skewed_clock_shifts_inner() {
        let start = Utc::now();
        let clock = SkewedClock::new(FixedClock::new(start), chrono::Duration::seconds(-3));
        assert_eq!(clock.now(), start - chrono::Duration::seconds(3));
    }

    #[tokio::test(start_paused = true)]
    async fn monotonic_clock_follows_tokio_time() {
        let clock = MonotonicClock::new();
        let t0 = clock.now();
        tokio::time::advance(Duration::from_secs(30)).await;
        let elapsed = clock.now() - t0;
        assert_eq!(elapsed.num_seconds(), 30);
    }
}
