//! The governed fetch path.
//!
//! `Governor` is the façade callers use instead of talking to the remote
//! store directly. A fetch goes through, in order:
//!
//! 1. the TTL cache (a fresh hit returns without touching the limiter),
//! 2. the sliding-window limiter, keyed by the normalized request shape,
//! 3. the remote call, whose success is recorded and cached,
//! 4. on refusal or exhaustion, the stale fallback: the expired cache
//!    entry, else the persisted snapshot, else the deferred queue.
//!
//! Transient failures are retried in a background task with a linearly
//! growing delay; the caller gets a [`RetryHandle`] immediately. An expired
//! value seen on the first pass stays available to later passes.
//!
//! Deferred requests are replayed by the queue drain. A replay is admitted
//! like a fresh call and requeued when refused.
//!
//! # Example
//!
//! ```no_run
//! use request_governor::{remote_call, FetchOptions, GovernorBuilder, Params};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let governor = GovernorBuilder::new().build::<serde_json::Value>()?;
//! let tasks = governor.start_background();
//!
//! let call = remote_call(|| async { Ok(json!({"name": "Acme"})) });
//! let outcome = governor
//!     .fetch("business", Params::new(), call, FetchOptions::default())
//!     .await?;
//! println!("served {}", outcome.kind());
//!
//! tasks.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use crate::application::cache::{CacheLookup, CacheStats, TtlCache};
use crate::application::config::{non_zero_duration, ConfigError};
use crate::application::limiter::{Admission, LimiterStatus, SlidingWindowLimiter};
use crate::application::metrics::{Metrics, MetricsSnapshot};
use crate::application::ports::{RemoteCall, SnapshotStore};
use crate::application::queue::{job, DeferredQueue};
use crate::application::scheduler::{spawn_periodic, ShutdownError, TaskHandle};
use crate::domain::endpoint::{normalize, CanonicalKey, RequestDescriptor};
use crate::domain::request::{Params, Priority, RemoteError};
use crate::domain::snapshot::Snapshot;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Values the governor can cache and persist.
pub trait Payload: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Payload for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Retry policy for transient remote failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries granted to a fetch that does not set its own budget
    pub max_retries: u32,
    /// Delay unit; the n-th retry waits `n * step`
    pub step: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            step: Duration::from_millis(1000),
        }
    }
}

impl RetryConfig {
    /// Validate the policy. A zero retry budget is allowed.
    ///
    /// # Errors
    /// Returns `ConfigError` for a zero `step`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero_duration("step", self.step)
    }

    /// Delay before the retry scheduled while `retries_remaining` are left.
    ///
    /// `(max_retries - retries_remaining + 1) * step`, so the first retry
    /// waits one step, the second two, and so on.
    pub fn delay_for(&self, retries_remaining: u32) -> Duration {
        let nth = self.max_retries.saturating_sub(retries_remaining) + 1;
        self.step.saturating_mul(nth)
    }
}

/// Error surfaced by the governor.
///
/// Admission denials never show up here: they resolve to
/// [`FetchOutcome::Stale`] or [`FetchOutcome::Deferred`].
#[derive(Debug, Error)]
pub enum GovernorError {
    /// A transient failure persisted through the whole retry budget
    #[error("remote call failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        /// Remote calls made, including the first
        attempts: u32,
        /// The last failure, message intact
        source: RemoteError,
    },
    /// The retry task was cancelled before it produced a result
    #[error("retry was cancelled")]
    RetryCancelled,
}

/// Per-call options for [`Governor::fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Queue priority if the call ends up deferred
    pub priority: Priority,
    /// Retry budget; `None` uses the configured `max_retries`
    pub retries_remaining: Option<u32>,
    /// Shape used for rate-limit grouping; `None` means a plain read of
    /// the resource type
    pub descriptor: Option<RequestDescriptor>,
}

impl FetchOptions {
    /// Set the queue priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the retry budget.
    pub fn with_retries(mut self, retries_remaining: u32) -> Self {
        self.retries_remaining = Some(retries_remaining);
        self
    }

    /// Set the request shape used for rate-limit grouping.
    pub fn with_descriptor(mut self, descriptor: RequestDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }
}

/// How a fetch was served.
pub enum FetchOutcome<V> {
    /// Fresh cache hit; the limiter was not consulted
    Cached(V),
    /// Result of an admitted remote call
    Fresh(V),
    /// Expired cache entry or persisted snapshot, served instead of an error
    Stale(V),
    /// A transient failure is being retried in the background
    Pending(RetryHandle<V>),
    /// Nothing to serve; the call was queued for later
    Deferred,
}

impl<V> FetchOutcome<V> {
    /// The served value, if any.
    pub fn value(&self) -> Option<&V> {
        match self {
            FetchOutcome::Cached(v) | FetchOutcome::Fresh(v) | FetchOutcome::Stale(v) => Some(v),
            FetchOutcome::Pending(_) | FetchOutcome::Deferred => None,
        }
    }

    /// Take the served value, if any.
    pub fn into_value(self) -> Option<V> {
        match self {
            FetchOutcome::Cached(v) | FetchOutcome::Fresh(v) | FetchOutcome::Stale(v) => Some(v),
            FetchOutcome::Pending(_) | FetchOutcome::Deferred => None,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchOutcome::Cached(_) => "cached",
            FetchOutcome::Fresh(_) => "fresh",
            FetchOutcome::Stale(_) => "stale",
            FetchOutcome::Pending(_) => "pending",
            FetchOutcome::Deferred => "deferred",
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for FetchOutcome<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Cached(v) => f.debug_tuple("Cached").field(v).finish(),
            FetchOutcome::Fresh(v) => f.debug_tuple("Fresh").field(v).finish(),
            FetchOutcome::Stale(v) => f.debug_tuple("Stale").field(v).finish(),
            FetchOutcome::Pending(handle) => f.debug_tuple("Pending").field(handle).finish(),
            FetchOutcome::Deferred => f.write_str("Deferred"),
        }
    }
}

/// Handle to a retry chain running in the background.
pub struct RetryHandle<V> {
    task: JoinHandle<Result<FetchOutcome<V>, GovernorError>>,
    first_delay: Duration,
}

impl<V> RetryHandle<V> {
    /// Delay before the first retry.
    pub fn first_delay(&self) -> Duration {
        self.first_delay
    }

    /// Whether the chain has settled.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the pending retry timer. A remote call already in flight
    /// is abandoned at its next await point.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Wait for the chain to settle.
    ///
    /// The result is never `Pending`: later retries run in the same chain.
    ///
    /// # Errors
    /// `RetriesExhausted` when every retry failed, `RetryCancelled` when
    /// the chain was cancelled.
    pub async fn wait(self) -> Result<FetchOutcome<V>, GovernorError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(GovernorError::RetryCancelled),
        }
    }
}

impl<V> fmt::Debug for RetryHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryHandle")
            .field("first_delay", &self.first_delay)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

/// Process-local stand-in id for a write that has not reached the store.
///
/// Ids grow monotonically within one process and mean nothing after a
/// restart; never persist them as keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(u64);

impl LocalId {
    /// Numeric part of the id.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// How a mutation was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome<T> {
    /// The store accepted the write; cached reads of the resource type were
    /// invalidated
    Applied(T),
    /// The write was queued at high priority; use the placeholder until it
    /// lands
    Placeholder(LocalId),
}

/// Combined observability view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorStatus {
    /// Limiter counters and breaker state
    pub limiter: LimiterStatus,
    /// Cache occupancy and hit accounting
    pub cache: CacheStats,
    /// Items waiting in the deferred queue
    pub queued: usize,
    /// Decision counters
    pub metrics: MetricsSnapshot,
}

/// Running background tasks (queue drain and cache sweep).
///
/// Dropping this value detaches the tasks; call [`shutdown`](Self::shutdown)
/// to stop them.
#[derive(Debug)]
pub struct BackgroundTasks {
    drain: TaskHandle,
    sweep: TaskHandle,
}

impl BackgroundTasks {
    /// Stop both tasks and wait for them.
    ///
    /// # Errors
    /// Returns the first `ShutdownError`; both tasks are stopped either way.
    pub async fn shutdown(self) -> Result<(), ShutdownError> {
        let drain = self.drain.shutdown().await;
        let sweep = self.sweep.shutdown().await;
        drain.and(sweep)
    }
}

/// Components a governor is assembled from.
pub(crate) struct GovernorParts<V: Payload> {
    pub limiter: SlidingWindowLimiter,
    pub cache: TtlCache<V>,
    pub queue: DeferredQueue,
    pub retry: RetryConfig,
    pub sweep_interval: Duration,
    pub primary_resource: String,
    pub snapshot_store: Option<Arc<dyn SnapshotStore>>,
    pub last_good: Option<Snapshot>,
}

struct Inner<V: Payload> {
    limiter: SlidingWindowLimiter,
    cache: TtlCache<V>,
    queue: Arc<DeferredQueue>,
    metrics: Metrics,
    retry: RetryConfig,
    sweep_interval: Duration,
    primary_resource: String,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
    last_good: Mutex<Option<Snapshot>>,
    next_local_id: AtomicU64,
}

/// One fetch, carried through retries and deferral.
struct FetchRequest<V> {
    resource_type: String,
    params: Params,
    key: CanonicalKey,
    call: RemoteCall<V>,
    priority: Priority,
    retries_remaining: u32,
    attempt: u32,
    /// Expired value seen by an earlier pass, kept for the stale fallback
    expired: Option<V>,
}

/// Result of one pass through the fetch path.
enum Step<V> {
    Done(Result<FetchOutcome<V>, GovernorError>),
    Retry(FetchRequest<V>, Duration),
}

/// Request governor: cache, limiter and deferred queue in front of a
/// fallible remote store. Clones share all state.
pub struct Governor<V: Payload = serde_json::Value> {
    inner: Arc<Inner<V>>,
}

impl<V: Payload> Clone for Governor<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Payload> Governor<V> {
    pub(crate) fn from_parts(parts: GovernorParts<V>) -> Self {
        Self {
            inner: Arc::new(Inner {
                limiter: parts.limiter,
                cache: parts.cache,
                queue: Arc::new(parts.queue),
                metrics: Metrics::new(),
                retry: parts.retry,
                sweep_interval: parts.sweep_interval,
                primary_resource: parts.primary_resource,
                snapshot_store: parts.snapshot_store,
                last_good: Mutex::new(parts.last_good),
                next_local_id: AtomicU64::new(1),
            }),
        }
    }

    /// Fetch `resource_type` with `params`, calling the store only when the
    /// cache cannot answer and the limiter admits the request.
    ///
    /// # Errors
    /// `GovernorError::RetriesExhausted` when the call failed transiently
    /// and no retries were left. Every other failure mode resolves to a
    /// [`FetchOutcome`].
    pub async fn fetch(
        &self,
        resource_type: &str,
        params: Params,
        call: RemoteCall<V>,
        options: FetchOptions,
    ) -> Result<FetchOutcome<V>, GovernorError> {
        let descriptor = options
            .descriptor
            .unwrap_or_else(|| RequestDescriptor::plain(resource_type));
        let request = FetchRequest {
            resource_type: resource_type.to_string(),
            params,
            key: normalize(&descriptor),
            call,
            priority: options.priority,
            retries_remaining: options
                .retries_remaining
                .unwrap_or(self.inner.retry.max_retries),
            attempt: 1,
            expired: None,
        };

        match self.attempt(request).await {
            Step::Done(result) => result,
            Step::Retry(next, delay) => Ok(FetchOutcome::Pending(self.spawn_retries(next, delay))),
        }
    }

    /// Write through the limiter.
    ///
    /// On success the cached reads of `resource_type` are invalidated. When
    /// the write is refused or fails, it is queued at `High` priority and a
    /// [`LocalId`] placeholder is returned instead.
    pub async fn mutate<T>(&self, resource_type: &str, call: RemoteCall<T>) -> MutationOutcome<T>
    where
        T: Send + 'static,
    {
        let key = normalize(&RequestDescriptor::plain(resource_type));
        if !self.admit(&key) {
            return self.defer_mutation(resource_type, key, call);
        }

        let result = call().await;
        match result {
            Ok(value) => {
                self.inner.limiter.record(&key);
                self.inner.cache.invalidate(resource_type);
                MutationOutcome::Applied(value)
            }
            Err(error) => {
                if error.is_resource_exhaustion() {
                    self.trip_exhausted();
                }
                tracing::warn!(resource_type, error = %error, "write failed, queued for replay");
                self.defer_mutation(resource_type, key, call)
            }
        }
    }

    /// Spawn the queue drain and cache sweep tasks.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn start_background(&self) -> BackgroundTasks {
        let drain = self.inner.queue.start();

        let owner = Arc::downgrade(&self.inner);
        let sweep = spawn_periodic("cache-sweep", self.inner.sweep_interval, move || {
            if let Some(inner) = owner.upgrade() {
                inner.cache.cleanup_expired();
            }
            std::future::ready(())
        });

        BackgroundTasks { drain, sweep }
    }

    /// The admission controller.
    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.inner.limiter
    }

    /// The response cache.
    pub fn cache(&self) -> &TtlCache<V> {
        &self.inner.cache
    }

    /// The deferred request queue.
    pub fn queue(&self) -> &Arc<DeferredQueue> {
        &self.inner.queue
    }

    /// Decision counters.
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Resource type whose last success is persisted.
    pub fn primary_resource(&self) -> &str {
        &self.inner.primary_resource
    }

    /// The retry policy.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.inner.retry
    }

    /// The most recent snapshot of the primary resource, if any.
    pub fn last_known_good(&self) -> Option<Snapshot> {
        self.last_good().clone()
    }

    /// Combined limiter, cache, queue and metrics view.
    pub fn status(&self) -> GovernorStatus {
        GovernorStatus {
            limiter: self.inner.limiter.status(),
            cache: self.inner.cache.stats(),
            queued: self.inner.queue.len(),
            metrics: self.inner.metrics.snapshot(),
        }
    }

    /// One pass: cache, admission, remote call, fallback.
    async fn attempt(&self, mut request: FetchRequest<V>) -> Step<V> {
        match self
            .inner
            .cache
            .lookup(&request.resource_type, &request.params)
        {
            CacheLookup::Fresh(value) => {
                self.inner.metrics.record_cache_hit();
                return Step::Done(Ok(FetchOutcome::Cached(value)));
            }
            CacheLookup::Expired(value) => request.expired = Some(value),
            // An earlier pass may already have evicted the expired entry
            CacheLookup::Missing => {}
        }

        if !self.admit(&request.key) {
            return Step::Done(Ok(self.fallback(request)));
        }

        let result = (request.call)().await;
        match result {
            Ok(value) => {
                self.store_success(&request, &value).await;
                Step::Done(Ok(FetchOutcome::Fresh(value)))
            }
            Err(error) if error.is_resource_exhaustion() => {
                tracing::warn!(
                    resource_type = %request.resource_type,
                    error = %error,
                    "remote store out of resources"
                );
                self.trip_exhausted();
                Step::Done(Ok(self.fallback(request)))
            }
            Err(error) if request.retries_remaining > 0 => {
                let delay = self.inner.retry.delay_for(request.retries_remaining);
                self.inner.metrics.record_retry_scheduled();
                tracing::debug!(
                    resource_type = %request.resource_type,
                    attempt = request.attempt,
                    retries_remaining = request.retries_remaining,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "remote call failed, retry scheduled"
                );
                let next = FetchRequest {
                    retries_remaining: request.retries_remaining - 1,
                    attempt: request.attempt + 1,
                    ..request
                };
                Step::Retry(next, delay)
            }
            Err(error) => {
                self.inner.metrics.record_retries_exhausted();
                tracing::warn!(
                    resource_type = %request.resource_type,
                    attempts = request.attempt,
                    error = %error,
                    "remote call failed, retries exhausted"
                );
                Step::Done(Err(GovernorError::RetriesExhausted {
                    attempts: request.attempt,
                    source: error,
                }))
            }
        }
    }

    fn spawn_retries(&self, request: FetchRequest<V>, delay: Duration) -> RetryHandle<V> {
        let governor = self.clone();
        let task = tokio::spawn(async move {
            let (mut request, mut delay) = (request, delay);
            loop {
                tokio::time::sleep(delay).await;
                match governor.attempt(request).await {
                    Step::Done(result) => return result,
                    Step::Retry(next, next_delay) => {
                        request = next;
                        delay = next_delay;
                    }
                }
            }
        });

        RetryHandle {
            task,
            first_delay: delay,
        }
    }

    /// Consult the limiter, keeping the decision counters in step.
    fn admit(&self, key: &CanonicalKey) -> bool {
        let admission = self.inner.limiter.check(key);
        match admission {
            Admission::Admitted => {
                self.inner.metrics.record_admission();
                true
            }
            Admission::GlobalCapReached { tripped } => {
                if tripped {
                    self.inner.metrics.record_circuit_trip();
                }
                self.inner.metrics.record_denial();
                false
            }
            Admission::CircuitOpen | Admission::KeyCapReached => {
                self.inner.metrics.record_denial();
                false
            }
        }
    }

    fn trip_exhausted(&self) {
        if self.inner.limiter.trip_resource_exhausted() {
            self.inner.metrics.record_circuit_trip();
        }
    }

    /// Expired value, else snapshot, else defer.
    fn fallback(&self, mut request: FetchRequest<V>) -> FetchOutcome<V> {
        let stale = request
            .expired
            .take()
            .or_else(|| self.snapshot_value(&request.resource_type));
        if let Some(value) = stale {
            self.inner.metrics.record_stale();
            tracing::debug!(resource_type = %request.resource_type, "serving stale data");
            return FetchOutcome::Stale(value);
        }

        self.queue_fetch(request);
        self.inner.metrics.record_deferred();
        FetchOutcome::Deferred
    }

    /// Park a fetch. On replay it must pass admission like any other call;
    /// a refused replay goes back into the queue untouched.
    fn queue_fetch(&self, request: FetchRequest<V>) {
        let owner = Arc::downgrade(&self.inner);
        let priority = request.priority;
        let replay = job(move || async move {
            let Some(governor) = Self::upgrade(&owner) else {
                return Ok(());
            };
            if !governor.admit(&request.key) {
                tracing::debug!(
                    resource_type = %request.resource_type,
                    "deferred request refused again, requeued"
                );
                governor.queue_fetch(request);
                return Ok(());
            }

            let result = (request.call)().await;
            match result {
                Ok(value) => {
                    governor.store_success(&request, &value).await;
                    Ok(())
                }
                Err(error) => {
                    if error.is_resource_exhaustion() {
                        governor.trip_exhausted();
                    }
                    Err(error)
                }
            }
        });

        self.inner.queue.enqueue(replay, priority);
    }

    fn defer_mutation<T>(
        &self,
        resource_type: &str,
        key: CanonicalKey,
        call: RemoteCall<T>,
    ) -> MutationOutcome<T>
    where
        T: Send + 'static,
    {
        self.queue_mutation(resource_type.to_string(), key, call);
        self.inner.metrics.record_deferred();

        let id = LocalId(self.inner.next_local_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(local_id = %id, "write deferred, returning placeholder");
        MutationOutcome::Placeholder(id)
    }

    fn queue_mutation<T>(&self, resource_type: String, key: CanonicalKey, call: RemoteCall<T>)
    where
        T: Send + 'static,
    {
        let owner = Arc::downgrade(&self.inner);
        let replay = job(move || async move {
            let Some(governor) = Self::upgrade(&owner) else {
                return Ok(());
            };
            if !governor.admit(&key) {
                tracing::debug!(resource_type = %resource_type, "deferred write refused again, requeued");
                governor.queue_mutation(resource_type, key, call);
                return Ok(());
            }

            let result = call().await;
            match result {
                Ok(_) => {
                    governor.inner.limiter.record(&key);
                    governor.inner.cache.invalidate(&resource_type);
                    Ok(())
                }
                Err(error) => {
                    if error.is_resource_exhaustion() {
                        governor.trip_exhausted();
                    }
                    Err(error)
                }
            }
        });

        self.inner.queue.enqueue(replay, Priority::High);
    }

    /// Record, cache and (for the primary resource) persist a success.
    async fn store_success(&self, request: &FetchRequest<V>, value: &V) {
        self.inner.limiter.record(&request.key);
        self.inner
            .cache
            .set(&request.resource_type, &request.params, value.clone());
        if request.resource_type == self.inner.primary_resource {
            self.remember(request, value).await;
        }
    }

    /// Update the in-memory snapshot, then persist it off the async worker.
    async fn remember(&self, request: &FetchRequest<V>, value: &V) {
        let encoded = match serde_json::to_value(value) {
            Ok(encoded) => encoded,
            Err(error) => {
                tracing::warn!(error = %error, "could not encode snapshot");
                return;
            }
        };
        let snapshot = Snapshot {
            resource_type: request.resource_type.clone(),
            params: request.params.clone(),
            value: encoded,
            saved_at_unix_ms: unix_millis(),
        };

        *self.last_good() = Some(snapshot.clone());

        let Some(store) = self.inner.snapshot_store.clone() else {
            return;
        };
        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::warn!(error = %error, "could not persist snapshot"),
            Err(error) => tracing::warn!(error = %error, "snapshot write task failed"),
        }
    }

    fn snapshot_value(&self, resource_type: &str) -> Option<V> {
        let encoded = self
            .last_good()
            .as_ref()
            .filter(|snapshot| snapshot.serves(resource_type))
            .map(|snapshot| snapshot.value.clone())?;

        match serde_json::from_value(encoded) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(resource_type, error = %error, "snapshot does not decode, ignoring it");
                None
            }
        }
    }

    fn last_good(&self) -> MutexGuard<'_, Option<Snapshot>> {
        self.inner
            .last_good
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn upgrade(owner: &Weak<Inner<V>>) -> Option<Self> {
        owner.upgrade().map(|inner| Self { inner })
    }
}

impl<V: Payload> fmt::Debug for Governor<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Governor")
            .field("limiter", &self.inner.limiter)
            .field("cache", &self.inner.cache)
            .field("queue", &self.inner.queue)
            .field("primary_resource", &self.inner.primary_resource)
            .finish_non_exhaustive()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::cache::CacheConfig;
    use crate::application::limiter::LimiterConfig;
    use crate::application::ports::{remote_call, Clock};
    use crate::application::queue::QueueConfig;
    use crate::domain::snapshot::SnapshotError;
    use crate::infrastructure::mocks::{MemorySnapshotStore, MockClock};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::mpsc;
    use std::time::Instant;

    fn governor_with(
        clock: &MockClock,
        store: Option<Arc<MemorySnapshotStore>>,
    ) -> Governor<Value> {
        governor_with_store(clock, store.map(|s| s as Arc<dyn SnapshotStore>))
    }

    fn governor_with_store(
        clock: &MockClock,
        store: Option<Arc<dyn SnapshotStore>>,
    ) -> Governor<Value> {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let last_good = store.as_ref().and_then(|s| s.load().ok().flatten());
        Governor::from_parts(GovernorParts {
            limiter: SlidingWindowLimiter::new(LimiterConfig::default(), Arc::clone(&clock)),
            cache: TtlCache::new(&CacheConfig::default(), Arc::clone(&clock)),
            queue: DeferredQueue::new(QueueConfig::default(), clock),
            retry: RetryConfig::default(),
            sweep_interval: Duration::from_secs(60),
            primary_resource: "business".to_string(),
            snapshot_store: store,
            last_good,
        })
    }

    fn counting_call(calls: &Arc<AtomicUsize>, value: Value) -> RemoteCall<Value> {
        let calls = Arc::clone(calls);
        remote_call(move || {
            let calls = Arc::clone(&calls);
            let value = value.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }
        })
    }

    fn failing_call(error: RemoteError) -> RemoteCall<Value> {
        remote_call(move || {
            let error = error.clone();
            async move { Err(error) }
        })
    }

    fn id(n: u64) -> Params {
        let mut params = Params::new();
        params.insert("id".to_string(), json!(n));
        params
    }

    #[test]
    fn test_retry_delays_grow_linearly() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(3), Duration::from_millis(1000));
        assert_eq!(retry.delay_for(2), Duration::from_millis(2000));
        assert_eq!(retry.delay_for(1), Duration::from_millis(3000));
        // A budget above max_retries still starts at one step
        assert_eq!(retry.delay_for(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_local_id_display() {
        assert_eq!(LocalId(7).to_string(), "local-7");
    }

    #[tokio::test]
    async fn test_fresh_then_cached() {
        let clock = MockClock::new(Instant::now());
        let governor = governor_with(&clock, None);
        let calls = Arc::new(AtomicUsize::new(0));
        let call = counting_call(&calls, json!({"name": "Acme"}));

        let first = governor
            .fetch("business", id(1), call.clone(), FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(first.kind(), "fresh");

        let second = governor
            .fetch("business", id(1), call, FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(second.kind(), "cached");
        assert_eq!(second.into_value(), Some(json!({"name": "Acme"})));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(governor.limiter().status().global_requests, 1);
    }

    #[tokio::test]
    async fn test_primary_success_is_persisted() {
        let clock = MockClock::new(Instant::now());
        let store = Arc::new(MemorySnapshotStore::new());
        let governor = governor_with(&clock, Some(Arc::clone(&store)));
        let calls = Arc::new(AtomicUsize::new(0));

        governor
            .fetch(
                "business",
                id(1),
                counting_call(&calls, json!("acme")),
                FetchOptions::default(),
            )
            .await
            .unwrap();
        governor
            .fetch(
                "contacts",
                id(1),
                counting_call(&calls, json!("alice")),
                FetchOptions::default(),
            )
            .await
            .unwrap();

        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.resource_type, "business");
        assert_eq!(saved.value, json!("acme"));
        assert_eq!(governor.last_known_good(), Some(saved));
    }

    #[tokio::test]
    async fn test_snapshot_write_failure_does_not_fail_fetch() {
        let clock = MockClock::new(Instant::now());
        let store = Arc::new(MemorySnapshotStore::new());
        store.fail_writes(true);
        let governor = governor_with(&clock, Some(Arc::clone(&store)));
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = governor
            .fetch(
                "business",
                id(1),
                counting_call(&calls, json!("acme")),
                FetchOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.kind(), "fresh");
        assert_eq!(store.saves(), 0);
        // The in-memory copy is still updated
        assert!(governor.last_known_good().is_some());

        store.fail_writes(false);
        governor.cache().clear();
        governor
            .fetch(
                "business",
                id(1),
                counting_call(&calls, json!("acme")),
                FetchOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(store.saves(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_trips_and_serves_expired_entry() {
        let clock = MockClock::new(Instant::now());
        let governor = governor_with(&clock, None);
        let calls = Arc::new(AtomicUsize::new(0));
        governor
            .fetch(
                "contacts",
                id(1),
                counting_call(&calls, json!("old")),
                FetchOptions::default(),
            )
            .await
            .unwrap();

        clock.advance(Duration::from_secs(121));
        let outcome = governor
            .fetch(
                "contacts",
                id(1),
                failing_call(RemoteError::insufficient_resources("pool exhausted")),
                FetchOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.kind(), "stale");
        assert_eq!(outcome.into_value(), Some(json!("old")));
        assert!(governor.limiter().status().is_limited);
        assert_eq!(governor.metrics().snapshot().circuit_trips, 1);
    }

    #[tokio::test]
    async fn test_denied_without_stale_data_defers() {
        let clock = MockClock::new(Instant::now());
        let governor = governor_with(&clock, None);
        governor.limiter().trip_resource_exhausted();

        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = governor
            .fetch(
                "campaigns",
                id(1),
                counting_call(&calls, json!("spring")),
                FetchOptions::default().with_priority(Priority::High),
            )
            .await
            .unwrap();

        assert_eq!(outcome.kind(), "deferred");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(governor.queue().len(), 1);

        // Once the backoff is over, draining replays the call and
        // populates the cache
        clock.advance(Duration::from_secs(5));
        governor.queue().drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(governor.cache().get("campaigns", &id(1)), Some(json!("spring")));
        assert_eq!(governor.limiter().status().global_requests, 1);
    }

    #[tokio::test]
    async fn test_replay_waits_for_breaker() {
        let clock = MockClock::new(Instant::now());
        let governor = governor_with(&clock, None);
        governor.limiter().trip_resource_exhausted();

        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = governor
            .fetch(
                "campaigns",
                id(1),
                counting_call(&calls, json!("spring")),
                FetchOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.kind(), "deferred");

        // Still limited: the replay is refused and put back
        governor.queue().drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(governor.queue().len(), 1);
        let status = governor.limiter().status();
        assert!(status.is_limited);
        assert_eq!(status.global_requests, 0);

        clock.advance(Duration::from_secs(5));
        governor.queue().drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(governor.queue().is_empty());
    }

    #[tokio::test]
    async fn test_replay_respects_key_cap() {
        let clock = MockClock::new(Instant::now());
        let governor = governor_with(&clock, None);
        let calls = Arc::new(AtomicUsize::new(0));

        for n in 0..5 {
            governor
                .fetch(
                    "contacts",
                    id(n),
                    counting_call(&calls, json!(n)),
                    FetchOptions::default(),
                )
                .await
                .unwrap();
        }
        let outcome = governor
            .fetch(
                "contacts",
                id(5),
                counting_call(&calls, json!(5)),
                FetchOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.kind(), "deferred");

        governor.queue().drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(governor.limiter().status().endpoint_counts.get("contacts"), Some(&5));
        assert_eq!(governor.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_deferred_write_waits_for_breaker() {
        let clock = MockClock::new(Instant::now());
        let governor = governor_with(&clock, None);
        governor.cache().set("contacts", &id(1), json!("alice"));
        governor.limiter().trip_resource_exhausted();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let write = remote_call(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, RemoteError>(())
            }
        });
        let outcome = governor.mutate("contacts", write).await;
        assert!(matches!(outcome, MutationOutcome::Placeholder(_)));

        governor.queue().drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(governor.queue().len(), 1);

        clock.advance(Duration::from_secs(5));
        governor.queue().drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(governor.cache().get("contacts", &id(1)), None);
    }

    #[tokio::test]
    async fn test_no_retry_budget_surfaces_error() {
        let clock = MockClock::new(Instant::now());
        let governor = governor_with(&clock, None);

        let result = governor
            .fetch(
                "sales",
                id(1),
                failing_call(RemoteError::new("socket closed")),
                FetchOptions::default().with_retries(0),
            )
            .await;

        match result {
            Err(GovernorError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 1);
                assert_eq!(source.message, "socket closed");
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mutation_invalidates_resource_type() {
        let clock = MockClock::new(Instant::now());
        let governor = governor_with(&clock, None);
        governor.cache().set("contacts", &id(1), json!("alice"));
        governor.cache().set("business", &id(1), json!("acme"));

        let outcome = governor
            .mutate("contacts", remote_call(|| async { Ok::<_, RemoteError>(42u32) }))
            .await;

        assert_eq!(outcome, MutationOutcome::Applied(42));
        assert_eq!(governor.cache().get("contacts", &id(1)), None);
        assert!(governor.cache().get("business", &id(1)).is_some());
    }

    #[tokio::test]
    async fn test_refused_mutations_get_increasing_placeholders() {
        let clock = MockClock::new(Instant::now());
        let governor = governor_with(&clock, None);
        governor.limiter().trip_resource_exhausted();

        let write = remote_call(|| async { Ok::<_, RemoteError>(()) });
        let first = governor.mutate("contacts", write.clone()).await;
        let second = governor.mutate("contacts", write).await;

        assert_eq!(first, MutationOutcome::Placeholder(LocalId(1)));
        assert_eq!(second, MutationOutcome::Placeholder(LocalId(2)));
        assert_eq!(governor.queue().len(), 2);
    }

    #[tokio::test]
    async fn test_status_combines_components() {
        let clock = MockClock::new(Instant::now());
        let governor = governor_with(&clock, None);
        let calls = Arc::new(AtomicUsize::new(0));
        governor
            .fetch(
                "products",
                id(1),
                counting_call(&calls, json!(1)),
                FetchOptions::default(),
            )
            .await
            .unwrap();

        let status = governor.status();
        assert_eq!(status.limiter.global_requests, 1);
        assert_eq!(status.cache.total_entries, 1);
        assert_eq!(status.queued, 0);
        assert_eq!(status.metrics.admissions, 1);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["limiter"]["globalRequests"], 1);
        assert_eq!(json["cache"]["totalEntries"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_keeps_expired_value_for_fallback() {
        let clock = MockClock::new(Instant::now());
        let governor = governor_with(&clock, None);
        governor.cache().set("contacts", &id(1), json!("old"));
        clock.advance(Duration::from_secs(121));

        let outcome = governor
            .fetch(
                "contacts",
                id(1),
                failing_call(RemoteError::new("connection reset")),
                FetchOptions::default().with_retries(1),
            )
            .await
            .unwrap();
        let FetchOutcome::Pending(handle) = outcome else {
            panic!("expected a pending retry");
        };
        // The first pass evicted the expired entry
        assert!(governor.cache().is_empty());

        governor.limiter().trip_resource_exhausted();
        let settled = handle.wait().await.unwrap();
        assert_eq!(settled.kind(), "stale");
        assert_eq!(settled.into_value(), Some(json!("old")));
        assert!(governor.queue().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_hitting_exhaustion_serves_expired_value() {
        let clock = MockClock::new(Instant::now());
        let governor = governor_with(&clock, None);
        governor.cache().set("sales", &id(1), json!(10));
        clock.advance(Duration::from_secs(61));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let call = remote_call(move || {
            let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    Err(RemoteError::new("connection reset"))
                } else {
                    Err(RemoteError::insufficient_resources("pool exhausted"))
                }
            }
        });

        let outcome = governor
            .fetch("sales", id(1), call, FetchOptions::default())
            .await
            .unwrap();
        let FetchOutcome::Pending(handle) = outcome else {
            panic!("expected a pending retry");
        };

        let settled: FetchOutcome<Value> = handle.wait().await.unwrap();
        assert_eq!(settled.into_value(), Some(json!(10)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(governor.limiter().status().is_limited);
    }

    /// Snapshot store whose `save` blocks until the test releases it.
    #[derive(Debug)]
    struct GatedStore {
        entered: AtomicBool,
        stalled: AtomicBool,
        saved: AtomicBool,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl SnapshotStore for GatedStore {
        fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
            Ok(None)
        }

        fn save(&self, _snapshot: &Snapshot) -> Result<(), SnapshotError> {
            self.entered.store(true, Ordering::SeqCst);
            let released = self
                .release
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5));
            self.stalled.store(released.is_err(), Ordering::SeqCst);
            self.saved.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn clear(&self) -> Result<(), SnapshotError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_snapshot_write_does_not_block_runtime() {
        let (release, gate) = mpsc::channel();
        let store = Arc::new(GatedStore {
            entered: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            saved: AtomicBool::new(false),
            release: Mutex::new(gate),
        });
        let clock = MockClock::new(Instant::now());
        let dyn_store: Arc<dyn SnapshotStore> = store.clone();
        let governor = governor_with_store(&clock, Some(dyn_store));

        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = tokio::spawn({
            let governor = governor.clone();
            let call = counting_call(&calls, json!("acme"));
            async move {
                governor
                    .fetch("business", id(1), call, FetchOptions::default())
                    .await
            }
        });

        // This single-threaded runtime only gets here if the write runs
        // on another thread
        while !store.entered.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        release.send(()).unwrap();

        let outcome = fetch.await.unwrap().unwrap();
        assert_eq!(outcome.kind(), "fresh");
        assert!(store.saved.load(Ordering::SeqCst));
        assert!(!store.stalled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_circuit_trips_counted_once_per_engagement() {
        let clock = MockClock::new(Instant::now());
        let governor = governor_with(&clock, None);
        let calls = Arc::new(AtomicUsize::new(0));

        for n in 0..20 {
            governor
                .fetch(
                    &format!("res_{n}"),
                    Params::new(),
                    counting_call(&calls, json!(n)),
                    FetchOptions::default(),
                )
                .await
                .unwrap();
        }
        let outcome = governor
            .fetch(
                "res_20",
                Params::new(),
                counting_call(&calls, json!(20)),
                FetchOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.kind(), "deferred");

        // Already limited: exhaustion and further denials add no trips
        governor.trip_exhausted();
        governor
            .fetch(
                "res_21",
                Params::new(),
                counting_call(&calls, json!(21)),
                FetchOptions::default(),
            )
            .await
            .unwrap();

        let breaker_trips = governor.limiter().circuit_breaker().trips();
        assert_eq!(breaker_trips, 1);
        assert_eq!(governor.metrics().snapshot().circuit_trips, breaker_trips);
    }
}
