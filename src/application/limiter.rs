//! Sliding-window admission control.
//!
//! The limiter counts recorded requests in a sliding window, globally and
//! per canonical key, and decides whether a new request may proceed. Hitting
//! the global cap trips the circuit breaker, after which every key is refused
//! until the backoff elapses. When the breaker lifts, all counters are
//! cleared.
//!
//! Admission and recording are separate steps: `can_admit` never consumes a
//! slot, and `record` must only follow a positive decision for the same call.

use crate::application::circuit_breaker::{CircuitBreaker, Observation, TripReason};
use crate::application::config::{non_zero_duration, non_zero_limit, ConfigError};
use crate::application::ports::Clock;
use crate::domain::endpoint::CanonicalKey;
use crate::domain::window::WindowCounter;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Tunable limiter policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Length of the sliding window
    pub window: Duration,
    /// Maximum recorded requests per window across all keys
    pub max_global: usize,
    /// Maximum recorded requests per window for one key
    pub max_per_key: usize,
    /// How long the breaker stays tripped
    pub backoff: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(1000),
            max_global: 20,
            max_per_key: 5,
            backoff: Duration::from_millis(5000),
        }
    }
}

impl LimiterConfig {
    /// Validate the policy.
    ///
    /// # Errors
    /// Returns `ConfigError` for zero durations or limits, or a per-key cap
    /// above the global cap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero_duration("window", self.window)?;
        non_zero_duration("backoff", self.backoff)?;
        non_zero_limit("max_global", self.max_global)?;
        non_zero_limit("max_per_key", self.max_per_key)?;
        if self.max_per_key > self.max_global {
            return Err(ConfigError::PerKeyAboveGlobal {
                max_per_key: self.max_per_key,
                max_global: self.max_global,
            });
        }
        Ok(())
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed
    Admitted,
    /// The circuit breaker is tripped
    CircuitOpen,
    /// The global window is full and the breaker was tripped
    GlobalCapReached {
        /// Whether this check moved the breaker out of `Normal`; false when
        /// a concurrent check tripped it first
        tripped: bool,
    },
    /// The key's window is full
    KeyCapReached,
}

impl Admission {
    /// Whether the request may proceed.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Read-only view of limiter state for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterStatus {
    /// Requests recorded in the current global window
    pub global_requests: usize,
    /// Requests recorded in the current window, per canonical key
    pub endpoint_counts: BTreeMap<String, usize>,
    /// Whether the circuit breaker is tripped
    pub is_limited: bool,
    /// Configured global cap
    pub max_global: usize,
    /// Configured per-key cap
    pub max_per_endpoint: usize,
}

#[derive(Debug, Default)]
struct Counters {
    global: WindowCounter,
    per_key: HashMap<CanonicalKey, WindowCounter>,
}

impl Counters {
    fn prune(&mut self, now: Instant, window: Duration) {
        self.global.prune(now, window);
        self.per_key.retain(|_, counter| {
            counter.prune(now, window);
            !counter.is_empty()
        });
    }

    fn clear(&mut self) {
        self.global.clear();
        self.per_key.clear();
    }
}

/// Sliding-window admission controller with a global circuit breaker.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    counters: Mutex<Counters>,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    config: LimiterConfig,
}

impl SlidingWindowLimiter {
    /// Create a limiter with its own circuit breaker.
    pub fn new(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(Arc::clone(&clock)));
        Self::with_breaker(config, clock, breaker)
    }

    /// Create a limiter around an existing circuit breaker.
    pub fn with_breaker(
        config: LimiterConfig,
        clock: Arc<dyn Clock>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            breaker,
            clock,
            config,
        }
    }

    /// Decide whether a request for `key` may proceed.
    pub fn can_admit(&self, key: &CanonicalKey) -> bool {
        self.check(key).is_admitted()
    }

    /// Decide admission and report why a request was refused.
    ///
    /// Reaching the global cap trips the circuit breaker as a side effect.
    pub fn check(&self, key: &CanonicalKey) -> Admission {
        let mut counters = self.lock();
        if self.observe_breaker(&mut counters) {
            return Admission::CircuitOpen;
        }

        let now = self.clock.now();
        counters.prune(now, self.config.window);

        if counters.global.len() >= self.config.max_global {
            drop(counters);
            let tripped = self
                .breaker
                .trip(TripReason::GlobalCapExceeded, self.config.backoff);
            tracing::debug!(key = %key, "admission denied: global cap reached");
            return Admission::GlobalCapReached { tripped };
        }

        let key_count = counters.per_key.get(key).map_or(0, WindowCounter::len);
        if key_count >= self.config.max_per_key {
            tracing::debug!(key = %key, count = key_count, "admission denied: key cap reached");
            return Admission::KeyCapReached;
        }

        Admission::Admitted
    }

    /// Record a request that was admitted for `key`.
    pub fn record(&self, key: &CanonicalKey) {
        let now = self.clock.now();
        let mut counters = self.lock();
        counters.global.push(now);
        counters.per_key.entry(key.clone()).or_default().push(now);
    }

    /// Trip the breaker because the remote store reported exhaustion.
    ///
    /// Returns true if the breaker was `Normal` before this call.
    pub fn trip_resource_exhausted(&self) -> bool {
        self.breaker
            .trip(TripReason::ResourceExhausted, self.config.backoff)
    }

    /// Snapshot counters and breaker state.
    pub fn status(&self) -> LimiterStatus {
        let mut counters = self.lock();
        let is_limited = self.observe_breaker(&mut counters);
        counters.prune(self.clock.now(), self.config.window);

        LimiterStatus {
            global_requests: counters.global.len(),
            endpoint_counts: counters
                .per_key
                .iter()
                .map(|(key, counter)| (key.to_string(), counter.len()))
                .collect(),
            is_limited,
            max_global: self.config.max_global,
            max_per_endpoint: self.config.max_per_key,
        }
    }

    /// Clear all counters and force the breaker back to normal.
    pub fn reset(&self) {
        self.lock().clear();
        self.breaker.reset();
    }

    /// The limiter policy.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// The circuit breaker this limiter trips.
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Returns true while limited. Clears counters when the breaker lifts.
    fn observe_breaker(&self, counters: &mut Counters) -> bool {
        match self.breaker.observe() {
            Observation::Limited => true,
            Observation::Lifted => {
                counters.clear();
                false
            }
            Observation::Normal => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        // Counters stay structurally valid even if a holder panicked
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
