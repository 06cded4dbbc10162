//! Observability counters for the governor.
//!
//! Every fetch ends in exactly one of: cache hit, fresh remote result,
//! stale fallback, deferral, pending retry or surfaced error. The counters
//! here let operators see that mix without parsing logs.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking governor decisions.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Clones share the same counters.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Fetches answered from fresh cache
    cache_hits: AtomicU64,
    /// Requests the limiter let through to the remote store
    admissions: AtomicU64,
    /// Requests the limiter refused
    denials: AtomicU64,
    /// Fetches answered with expired or snapshot data
    stale_served: AtomicU64,
    /// Requests parked in the deferred queue
    deferred: AtomicU64,
    /// Retries scheduled after transient failures
    retries_scheduled: AtomicU64,
    /// Fetches that failed after the retry budget ran out
    retries_exhausted: AtomicU64,
    /// Times the circuit breaker moved out of `Normal`
    circuit_trips: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub(crate) fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_admission(&self) {
        self.inner.admissions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_denial(&self) {
        self.inner.denials.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale(&self) {
        self.inner.stale_served.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deferred(&self) {
        self.inner.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry_scheduled(&self) {
        self.inner.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retries_exhausted(&self) {
        self.inner.retries_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_circuit_trip(&self) {
        self.inner.circuit_trips.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            cache_hits: load(&self.inner.cache_hits),
            admissions: load(&self.inner.admissions),
            denials: load(&self.inner.denials),
            stale_served: load(&self.inner.stale_served),
            deferred: load(&self.inner.deferred),
            retries_scheduled: load(&self.inner.retries_scheduled),
            retries_exhausted: load(&self.inner.retries_exhausted),
            circuit_trips: load(&self.inner.circuit_trips),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        for counter in [
            &self.inner.cache_hits,
            &self.inner.admissions,
            &self.inner.denials,
            &self.inner.stale_served,
            &self.inner.deferred,
            &self.inner.retries_scheduled,
            &self.inner.retries_exhausted,
            &self.inner.circuit_trips,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Fetches answered from fresh cache
    pub cache_hits: u64,
    /// Requests admitted to the remote store
    pub admissions: u64,
    /// Requests refused by the limiter
    pub denials: u64,
    /// Fetches answered with expired or snapshot data
    pub stale_served: u64,
    /// Requests parked in the deferred queue
    pub deferred: u64,
    /// Retries scheduled
    pub retries_scheduled: u64,
    /// Fetches that ran out of retries
    pub retries_exhausted: u64,
    /// Circuit breaker trips
    pub circuit_trips: u64,
}

impl MetricsSnapshot {
    /// Fraction of limiter decisions that were denials (0.0 to 1.0).
    ///
    /// Returns 0.0 if the limiter has not been consulted.
    pub fn denial_rate(&self) -> f64 {
        let total = self.admissions.saturating_add(self.denials);
        if total == 0 {
            0.0
        } else {
            self.denials as f64 / total as f64
        }
    }
}
