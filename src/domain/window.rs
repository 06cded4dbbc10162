//! Sliding-window event counters.
//!
//! A `WindowCounter` keeps the timestamps of recent events in arrival order.
//! Timestamps older than the window are pruned before every observation, so
//! the length of the counter is always the number of events inside the
//! current window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Ordered event timestamps within a sliding window.
///
/// # Example
/// ```
/// use request_governor::WindowCounter;
/// use std::time::{Duration, Instant};
///
/// let window = Duration::from_secs(1);
/// let mut counter = WindowCounter::new();
/// let now = Instant::now();
///
/// counter.push(now);
/// counter.push(now);
/// assert_eq!(counter.count(now, window), 2);
///
/// // Once the window has passed, the old events no longer count
/// let later = now + Duration::from_millis(1001);
/// assert_eq!(counter.count(later, window), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct WindowCounter {
    timestamps: VecDeque<Instant>,
}

impl WindowCounter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self {
            timestamps: VecDeque::new(),
        }
    }

    /// Drop timestamps that fell out of the window ending at `now`.
    pub fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) > window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Prune, then return the number of events in the window.
    pub fn count(&mut self, now: Instant, window: Duration) -> usize {
        self.prune(now, window);
        self.timestamps.len()
    }

    /// Append an event timestamp.
    pub fn push(&mut self, timestamp: Instant) {
        self.timestamps.push_back(timestamp);
    }

    /// Number of timestamps currently held (without pruning).
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Check whether the counter holds no timestamps.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Oldest timestamp still held.
    pub fn oldest(&self) -> Option<Instant> {
        self.timestamps.front().copied()
    }

    /// Forget every timestamp.
    pub fn clear(&mut self) {
        self.timestamps.clear();
    }
}
