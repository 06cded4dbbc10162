//! # request-governor
//!
//! Admission control, TTL caching and deferred request queuing in front of a
//! remote data store that falls over under load.
//!
//! Callers ask the [`Governor`] for a resource instead of calling the store
//! directly. The governor answers from cache when it can, lets the request
//! through when the sliding-window limiter admits it, and otherwise serves
//! stale data or parks the request for later. A store that reports
//! `INSUFFICIENT_RESOURCES` trips a global circuit breaker that refuses all
//! traffic for a backoff period.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use request_governor::{remote_call, FetchOptions, FetchOutcome, GovernorBuilder, Params};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let governor = GovernorBuilder::new()
//!     .with_snapshot_path("/var/lib/app/business.json")
//!     .build::<serde_json::Value>()?;
//!
//! // Queue drain every 2s, cache sweep every 60s
//! let tasks = governor.start_background();
//!
//! let call = remote_call(|| async { Ok(json!({"name": "Acme"})) });
//! match governor
//!     .fetch("business", Params::new(), call, FetchOptions::default())
//!     .await?
//! {
//!     FetchOutcome::Cached(v) | FetchOutcome::Fresh(v) => println!("current: {v}"),
//!     FetchOutcome::Stale(v) => println!("possibly outdated: {v}"),
//!     FetchOutcome::Pending(retry) => println!("retrying in {:?}", retry.first_delay()),
//!     FetchOutcome::Deferred => println!("temporarily unavailable"),
//! }
//!
//! tasks.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## How a fetch is served
//!
//! 1. **Cache.** A fresh entry is returned at once and costs no admission
//!    slot. Freshness depends on the resource type: 30 minutes for
//!    `business`, 1 minute for `campaigns` and `sales`, 5 minutes by default.
//! 2. **Admission.** The request is normalized to a tracking key (existence
//!    checks and owner-scoped queries collapse to `<resource>_check` and
//!    `<resource>_by_owner`). It is refused if the breaker is tripped, if 20
//!    requests were recorded in the last second, or if 5 were recorded for
//!    its key.
//! 3. **Remote call.** Successes are recorded with the limiter and cached.
//!    Transient failures are retried after 1s, 2s, 3s; the caller receives a
//!    [`RetryHandle`] immediately.
//! 4. **Fallback.** A refused or exhausted request gets the expired cache
//!    entry or the persisted snapshot if either exists. Otherwise it is
//!    queued and the caller receives [`FetchOutcome::Deferred`].
//!
//! Denial is never an error. Only an exhausted retry budget surfaces as
//! [`GovernorError`].
//!
//! ## Circuit breaker
//!
//! ```rust
//! use request_governor::{CanonicalKey, GovernorBuilder, CircuitState};
//!
//! let governor = GovernorBuilder::new().build::<serde_json::Value>().unwrap();
//! governor.limiter().trip_resource_exhausted();
//!
//! let breaker = governor.limiter().circuit_breaker();
//! assert_eq!(breaker.state(), CircuitState::GloballyLimited);
//! assert!(!governor.limiter().can_admit(&CanonicalKey::new("anything")));
//! ```
//!
//! The breaker lifts by itself once the backoff has elapsed (evaluated the
//! next time anyone asks) and all window counters are cleared when it does.
//!
//! ## Deferred queue
//!
//! Parked requests are replayed by the background drain, three per cycle,
//! half a second apart, `High` priority first and oldest first within a
//! priority. A replay must pass admission like any other call; one that is
//! refused goes back into the queue. Replay is best-effort: a request that
//! fails again is logged at `WARN` and dropped.
//!
//! ## Recovery
//!
//! [`RecoveryController::emergency_reset`] clears limiter, cache and queue
//! state in one call and re-fetches the primary resource two seconds later.
//!
//! ## Observability
//!
//! ```rust
//! # use request_governor::GovernorBuilder;
//! # let governor = GovernorBuilder::new().build::<serde_json::Value>().unwrap();
//! let status = governor.status();
//! println!("{}", serde_json::to_string_pretty(&status).unwrap());
//! println!("denial rate: {:.2}", status.metrics.denial_rate());
//! println!("cache hit rate: {:.2}", status.cache.hit_rate());
//! ```
//!
//! The limiter and cache parts serialize with the `globalRequests`,
//! `endpointCounts`, `isLimited`, `maxGlobal`, `maxPerEndpoint` and
//! `totalEntries`, `validEntries`, `expiredEntries`, `maxSize`,
//! `usagePercent` keys. All decisions are logged through `tracing`.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    endpoint::{normalize, CanonicalKey, RequestDescriptor, RequestShape},
    request::{cache_key, Params, Priority, RemoteError, INSUFFICIENT_RESOURCES},
    snapshot::{Snapshot, SnapshotError},
    ttl::{ResourceTypePolicy, TtlPolicyError},
    window::WindowCounter,
};

pub use application::{
    cache::{CacheConfig, CacheEntry, CacheLookup, CacheStats, TtlCache},
    circuit_breaker::{CircuitBreaker, CircuitState, TripReason},
    config::ConfigError,
    governor::{
        BackgroundTasks, FetchOptions, FetchOutcome, Governor, GovernorError, GovernorStatus,
        LocalId, MutationOutcome, Payload, RetryConfig, RetryHandle,
    },
    limiter::{Admission, LimiterConfig, LimiterStatus, SlidingWindowLimiter},
    metrics::{Metrics, MetricsSnapshot},
    ports::{
        remote_call, BoxFuture, Clock, EvictionCandidate, EvictionPolicy, RemoteCall,
        SnapshotStore, Storage,
    },
    queue::{job, DeferredQueue, DrainOutcome, DrainReport, Job, QueueConfig},
    recovery::{RecoveryConfig, RecoveryController, WarmupFetch},
    scheduler::{ShutdownError, TaskHandle},
};

pub use infrastructure::{
    builder::{BuildError, GovernorBuilder, DEFAULT_PRIMARY_RESOURCE},
    clock::SystemClock,
    eviction::OldestEntryEviction,
    snapshot::FileSnapshotStore,
    storage::ShardedStorage,
};
