//! Wall-clock adapter for the `Clock` port.
//!
//! Window counters, cache ages and the breaker deadline are all measured
//! against this monotonic clock. Tests swap in `MockClock`
//! (`crate::infrastructure::mocks`, available with the `test-helpers`
//! feature).

use crate::application::ports::Clock;
use std::time::Instant;

/// Monotonic system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.now() > t1);
    }
}
