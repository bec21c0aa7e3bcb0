//! Monotonic elapsed-time source shared by every stage.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Monotonically increasing elapsed time with microsecond resolution.
///
/// Cheap to copy; every copy measures from the same origin, so stages in
/// different chains agree on "now".
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
    unix_origin_us: u64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        let unix_origin_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        Self {
            origin: Instant::now(),
            unix_origin_us,
        }
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Elapsed microseconds since the clock was created.
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    /// Wall-clock anchored time: the wall time at creation plus monotonic
    /// elapsed time. Never jumps backwards even if the system clock does.
    #[inline]
    pub fn unix_us(&self) -> u64 {
        self.unix_origin_us + self.now_us()
    }

    /// Converts an `Instant` into this clock's microsecond domain.
    /// Instants before the origin saturate to zero.
    pub fn us_at(&self, instant: Instant) -> u64 {
        instant
            .checked_duration_since(self.origin)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let clock = MonotonicClock::new();
        let mut last = clock.now_us();
        for _ in 0..1000 {
            let now = clock.now_us();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_copies_share_origin() {
        let clock = MonotonicClock::new();
        std::thread::sleep(Duration::from_millis(2));
        let copy = clock;
        let a = clock.now_us();
        let b = copy.now_us();
        assert!(b >= a);
        assert!(b - a < 1_000);
        assert!(a >= 2_000);
    }

    #[test]
    fn test_unix_anchor_advances_with_elapsed() {
        let clock = MonotonicClock::new();
        let first = clock.unix_us();
        std::thread::sleep(Duration::from_millis(1));
        assert!(clock.unix_us() > first);
    }

    #[test]
    fn test_us_at_saturates_before_origin() {
        let before = Instant::now();
        std::thread::sleep(Duration::from_millis(1));
        let clock = MonotonicClock::new();
        assert_eq!(clock.us_at(before), 0);
        assert!(clock.us_at(Instant::now() + Duration::from_millis(5)) >= 5_000);
    }
}
