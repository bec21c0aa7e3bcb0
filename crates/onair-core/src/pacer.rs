//! Fixed-period pacing for stage loops.

use crate::cancel::CancelToken;
use std::time::{Duration, Instant};

/// What happened during a [`IntervalPacer::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// The full interval elapsed.
    Released,
    /// The caller was already past the deadline by the given amount. No
    /// catch-up is applied; the next period starts now.
    Overrun(Duration),
    /// The token was cancelled while waiting.
    Cancelled,
}

/// Releases the caller once per `interval`, measured from the previous
/// release. Waiting is a timed block on the cancel token, so the thread
/// yields the CPU and wakes immediately on cancellation.
#[derive(Debug)]
pub struct IntervalPacer {
    interval: Duration,
    last_release: Instant,
}

impl IntervalPacer {
    /// The first period is measured from construction.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_release: Instant::now(),
        }
    }

    pub fn from_micros(interval_us: u64) -> Self {
        Self::new(Duration::from_micros(interval_us))
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Restarts the current period from now.
    pub fn reset(&mut self) {
        self.last_release = Instant::now();
    }

    pub fn wait(&mut self, token: &CancelToken) -> Pace {
        let deadline = self.last_release + self.interval;
        let entered = Instant::now();
        if entered >= deadline {
            self.last_release = entered;
            return Pace::Overrun(entered - deadline);
        }

        loop {
            let now = Instant::now();
            if now >= deadline {
                self.last_release = now;
                return Pace::Released;
            }
            // Timed waits may wake a little early; loop until the deadline.
            if token.wait_timeout(deadline - now) {
                self.last_release = Instant::now();
                return Pace::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consecutive_waits_respect_interval() {
        let token = CancelToken::new();
        let interval = Duration::from_millis(10);
        let mut pacer = IntervalPacer::new(interval);

        pacer.wait(&token);
        let first = Instant::now();
        assert_eq!(pacer.wait(&token), Pace::Released);
        assert!(first.elapsed() >= interval - Duration::from_micros(200));
    }

    #[test]
    fn test_overrun_returns_immediately() {
        let token = CancelToken::new();
        let mut pacer = IntervalPacer::new(Duration::from_millis(2));
        std::thread::sleep(Duration::from_millis(10));

        let start = Instant::now();
        match pacer.wait(&token) {
            Pace::Overrun(late) => assert!(late >= Duration::from_millis(5)),
            other => panic!("expected overrun, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_millis(2));
    }

    #[test]
    fn test_overrun_starts_a_fresh_period() {
        let token = CancelToken::new();
        let interval = Duration::from_millis(5);
        let mut pacer = IntervalPacer::new(interval);
        std::thread::sleep(Duration::from_millis(12));
        assert!(matches!(pacer.wait(&token), Pace::Overrun(_)));

        let after_overrun = Instant::now();
        assert_eq!(pacer.wait(&token), Pace::Released);
        assert!(after_overrun.elapsed() >= interval - Duration::from_micros(200));
    }

    #[test]
    fn test_cancel_interrupts_wait() {
        let token = CancelToken::new();
        let mut pacer = IntervalPacer::new(Duration::from_secs(30));
        let canceller = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            canceller.cancel();
        });

        let start = Instant::now();
        assert_eq!(pacer.wait(&token), Pace::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cancelled_token_returns_without_blocking() {
        let token = CancelToken::new();
        token.cancel();
        let mut pacer = IntervalPacer::new(Duration::from_secs(30));
        assert_eq!(pacer.wait(&token), Pace::Cancelled);
    }
}
