//! Sliding-window admission with a concurrency cap.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Shortest deferral handed back to the dispatcher.
pub const MIN_WAIT: Duration = Duration::from_secs(1);

/// Trailing-window call counter for one backend.
///
/// Each admitted call leaves a timestamp; timestamps older than the window
/// are pruned on every check. Concurrency is tracked separately and released
/// when the call finishes or its item times out.
#[derive(Debug)]
pub struct RateWindow {
    stamps: VecDeque<Instant>,
    max_per_window: usize,
    window: Duration,
    concurrency: usize,
    in_flight: usize,
}

impl RateWindow {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            stamps: VecDeque::new(),
            max_per_window: config.max_per_window.max(1) as usize,
            window: config.window(),
            concurrency: config.concurrency.max(1) as usize,
            in_flight: 0,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.stamps.front() {
            if now.duration_since(*oldest) >= self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Admit one call at `now`, or return how long to wait before asking again.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.prune(now);

        if self.in_flight >= self.concurrency {
            return Err(MIN_WAIT);
        }
        if self.stamps.len() >= self.max_per_window {
            let wait = self
                .stamps
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(MIN_WAIT);
            return Err(wait.max(MIN_WAIT));
        }

        self.stamps.push_back(now);
        self.in_flight += 1;
        Ok(())
    }

    /// Free the concurrency slot taken by a finished call.
    pub fn release(&mut self) {
        if self.in_flight > 0 {
            self.in_flight -= 1;
        }
    }

    pub fn window_count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.stamps.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(max: u32, window_ms: u64, concurrency: u32) -> RateWindow {
        RateWindow::new(&RateLimitConfig {
            max_per_window: max,
            window_ms,
            concurrency,
        })
    }

    #[test]
    fn test_concurrency_cap() {
        let mut w = window(100, 60_000, 2);
        let now = Instant::now();
        assert!(w.try_acquire(now).is_ok());
        assert!(w.try_acquire(now).is_ok());
        assert_eq!(w.try_acquire(now), Err(MIN_WAIT));

        w.release();
        assert_eq!(w.in_flight(), 1);
        assert!(w.try_acquire(now).is_ok());
    }

    #[test]
    fn test_full_window_waits_for_oldest_stamp() {
        let mut w = window(2, 10_000, 10);
        let start = Instant::now();
        w.try_acquire(start).unwrap();
        w.try_acquire(start + Duration::from_secs(3)).unwrap();

        let now = start + Duration::from_secs(4);
        assert_eq!(w.try_acquire(now), Err(Duration::from_secs(6)));

        let now = start + Duration::from_secs(10);
        assert_eq!(w.window_count(now), 1);
        assert!(w.try_acquire(now).is_ok());
    }

    #[test]
    fn test_wait_never_below_minimum() {
        let mut w = window(1, 60_000, 10);
        let start = Instant::now();
        w.try_acquire(start).unwrap();
        let almost = start + Duration::from_millis(59_800);
        assert_eq!(w.try_acquire(almost), Err(MIN_WAIT));
    }

    #[test]
    fn test_release_does_not_underflow() {
        let mut w = window(1, 1_000, 1);
        w.release();
        assert_eq!(w.in_flight(), 0);
    }
}
