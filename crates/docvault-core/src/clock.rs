//! Time sources.
//!
//! Token buckets measure elapsed time on a monotonic clock; cache entries
//! carry wall-clock insertion times because they may be read by another
//! process. Both go through [`Clock`] so tests can drive time by hand.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A source of nanosecond timestamps.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in nanoseconds relative to the clock's own origin.
    fn now_nanos(&self) -> u64;
}

/// Monotonic clock anchored at construction time.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Wall clock in nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now_nanos(&self) -> u64 {
        Utc::now()
            .timestamp_nanos_opt()
            .map(|n| n.max(0) as u64)
            .unwrap_or(u64::MAX)
    }
}

/// Manually advanced clock for tests.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the clock at an arbitrary offset.
    pub fn starting_at(start: Duration) -> Self {
        let clock = Self::new();
        clock.set(start);
        clock
    }

    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(by, Ordering::SeqCst);
    }

    pub fn set(&self, at: Duration) {
        let at = u64::try_from(at.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.store(at, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_nanos(), 0);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now_nanos(), 1_500_000_000);

        let shared = clock.clone();
        shared.advance(Duration::from_secs(1));
        assert_eq!(clock.now_nanos(), 2_500_000_000);
    }

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::starting_at(Duration::from_secs(10));
        assert_eq!(clock.now_nanos(), 10_000_000_000);
        clock.set(Duration::from_secs(3));
        assert_eq!(clock.now_nanos(), 3_000_000_000);
    }

    #[test]
    fn test_monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now_nanos();
        let b = clock.now_nanos();
        assert!(b >= a);
    }

    #[test]
    fn test_wall_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        let floor = 1_577_836_800u64 * 1_000_000_000;
        assert!(WallClock.now_nanos() > floor);
    }
}
