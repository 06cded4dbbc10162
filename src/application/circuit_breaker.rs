//! Global circuit breaker guarding the remote store.
//!
//! The breaker has two states. While `Normal`, the limiter decides admission
//! from its window counters. Once tripped (global cap exceeded, or the store
//! reported resource exhaustion) it is `GloballyLimited` until `lift_at`,
//! and every admission is refused regardless of counters.
//!
//! Reversion is evaluated lazily against the injected clock whenever the
//! state is observed, so there is no timer to cancel: `reset` simply
//! forces `Normal` and forgets `lift_at`.

use crate::application::ports::Clock;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Admission is decided by the window counters
    Normal = 0,
    /// All admissions are refused until the backoff elapses
    GloballyLimited = 1,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::GloballyLimited,
            _ => CircuitState::Normal,
        }
    }
}

/// Why the breaker was tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripReason {
    /// The global window counter reached its cap
    GlobalCapExceeded,
    /// The remote store reported resource exhaustion
    ResourceExhausted,
}

/// Outcome of observing the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Normal, and already was
    Normal,
    /// Was limited but the backoff elapsed; now `Normal`
    Lifted,
    /// Still limited
    Limited,
}

/// Process-wide circuit breaker with an explicit `lift_at`.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    /// `lift_at` as nanoseconds since `epoch`
    lift_at_nanos: AtomicU64,
    trips: AtomicU64,
    clock: Arc<dyn Clock>,
    /// Reference epoch for timestamp calculations
    epoch: Instant,
}

impl CircuitBreaker {
    /// Create a breaker in the `Normal` state.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let epoch = clock.now();
        Self {
            state: AtomicU8::new(CircuitState::Normal as u8),
            lift_at_nanos: AtomicU64::new(0),
            trips: AtomicU64::new(0),
            clock,
            epoch,
        }
    }

    /// Raw state, without evaluating `lift_at`.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Evaluate the breaker at the current time.
    ///
    /// Transitions `GloballyLimited -> Normal` when `lift_at` has passed.
    /// Only one caller observes `Lifted` for a given trip.
    pub fn observe(&self) -> Observation {
        match self.state() {
            CircuitState::Normal => Observation::Normal,
            CircuitState::GloballyLimited => {
                let now = self.clock.now();
                if now < self.lift_at_instant() {
                    return Observation::Limited;
                }

                let result = self.state.compare_exchange(
                    CircuitState::GloballyLimited as u8,
                    CircuitState::Normal as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                match result {
                    Ok(_) => {
                        tracing::info!("global request limit lifted");
                        Observation::Lifted
                    }
                    // Someone else lifted (or reset) it first
                    Err(_) => Observation::Normal,
                }
            }
        }
    }

    /// Check whether the breaker currently refuses all traffic.
    pub fn is_limited(&self) -> bool {
        self.observe() == Observation::Limited
    }

    /// Trip the breaker for `backoff` starting now.
    ///
    /// Tripping an already limited breaker extends `lift_at` if the new
    /// deadline is later. Returns true when this call moved the breaker out
    /// of `Normal`.
    pub fn trip(&self, reason: TripReason, backoff: Duration) -> bool {
        let now = self.clock.now();
        let lift_at = self.to_nanos(now + backoff);
        let previous = self.lift_at_nanos.fetch_max(lift_at, Ordering::AcqRel);
        let was = self
            .state
            .swap(CircuitState::GloballyLimited as u8, Ordering::AcqRel);

        if CircuitState::from(was) == CircuitState::Normal {
            // Deadlines left over from an earlier trip never outlive a fresh one
            self.lift_at_nanos.store(lift_at, Ordering::Release);
            self.trips.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                reason = ?reason,
                backoff_ms = backoff.as_millis() as u64,
                "global request limit engaged"
            );
            true
        } else {
            if lift_at > previous {
                tracing::debug!(reason = ?reason, "global request limit extended");
            }
            false
        }
    }

    /// When the current limitation lifts, if limited.
    pub fn lift_at(&self) -> Option<Instant> {
        match self.state() {
            CircuitState::Normal => None,
            CircuitState::GloballyLimited => Some(self.lift_at_instant()),
        }
    }

    /// Number of `Normal -> GloballyLimited` transitions so far.
    pub fn trips(&self) -> u64 {
        self.trips.load(Ordering::Relaxed)
    }

    /// Force `Normal`, dropping any pending lift deadline.
    pub fn reset(&self) {
        self.state
            .store(CircuitState::Normal as u8, Ordering::Release);
        self.lift_at_nanos.store(0, Ordering::Release);
    }

    fn lift_at_instant(&self) -> Instant {
        let nanos = self.lift_at_nanos.load(Ordering::Acquire);
        self.epoch + Duration::from_nanos(nanos)
    }

    fn to_nanos(&self, instant: Instant) -> u64 {
        instant
            .saturating_duration_since(self.epoch)
            .as_nanos()
            .try_into()
            .unwrap_or(u64::MAX)
    }
}
