//! Mock clock for testing.

use crate::application::ports::Clock;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Manually driven clock.
///
/// Window expiry, cache TTLs and the breaker deadline all read the injected
/// clock, so a test can jump past them without sleeping.
///
/// # Examples
///
/// ```
/// use request_governor::infrastructure::mocks::MockClock;
/// use request_governor::{CanonicalKey, LimiterConfig, SlidingWindowLimiter};
/// use std::sync::Arc;
/// use std::time::{Duration, Instant};
///
/// let clock = MockClock::new(Instant::now());
/// let limiter = SlidingWindowLimiter::new(LimiterConfig::default(), Arc::new(clock.clone()));
/// let key = CanonicalKey::new("contacts");
///
/// for _ in 0..5 {
///     limiter.record(&key);
/// }
/// assert!(!limiter.can_admit(&key));
///
/// clock.advance(Duration::from_millis(1001));
/// assert!(limiter.can_admit(&key));
/// ```
///
/// All clones share the same time value, so advancing one advances all.
#[derive(Debug, Clone)]
pub struct MockClock {
    current_time: Arc<Mutex<Instant>>,
}

impl MockClock {
    /// Create a mock clock starting at a specific instant.
    pub fn new(start: Instant) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        *self.lock() += duration;
    }

    /// Set the clock to a specific instant.
    pub fn set(&self, instant: Instant) {
        *self.lock() = instant;
    }

    fn lock(&self) -> MutexGuard<'_, Instant> {
        self.current_time
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.lock()
    }
}
