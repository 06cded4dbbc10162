//! Priority-ordered queue of deferred requests.
//!
//! Requests that could not run immediately are parked here and replayed in
//! small batches: all `High` entries first, then `Normal`, each group in
//! arrival order. Items in a batch run one after another with a fixed pause
//! between them so the replay itself does not trip the limiter again.
//!
//! Delivery is best-effort. An item that fails is logged and dropped.

use crate::application::config::{non_zero_duration, non_zero_limit, ConfigError};
use crate::application::ports::{BoxFuture, Clock};
use crate::application::scheduler::{spawn_periodic, TaskHandle};
use crate::domain::request::{Priority, RemoteError};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Deferred work: invoked at most once.
pub type Job = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), RemoteError>> + Send>;

/// Box an async closure as a [`Job`].
pub fn job<F, Fut>(f: F) -> Job
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), RemoteError>> + Send + 'static,
{
    Box::new(move || -> BoxFuture<'static, Result<(), RemoteError>> { Box::pin(f()) })
}

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// How often the background task drains
    pub drain_interval: Duration,
    /// Maximum items invoked per drain
    pub batch_size: usize,
    /// Pause between two items of the same drain
    pub item_spacing: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_millis(2000),
            batch_size: 3,
            item_spacing: Duration::from_millis(500),
        }
    }
}

impl QueueConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` for a zero interval or batch size. Zero spacing
    /// is allowed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero_duration("drain_interval", self.drain_interval)?;
        non_zero_limit("batch_size", self.batch_size)
    }
}

/// A parked request.
pub struct QueuedRequest {
    job: Job,
    priority: Priority,
    enqueued_at: Instant,
    seq: u64,
}

impl QueuedRequest {
    /// Scheduling priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// When the request was parked.
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }
}

impl fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("priority", &self.priority)
            .field("enqueued_at", &self.enqueued_at)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// What one drain cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items invoked, successful or not
    pub invoked: usize,
    /// Invoked items that returned an error and were dropped
    pub failed: usize,
    /// Items taken for this batch but discarded because the queue was cleared
    pub discarded: usize,
    /// Items left in the queue afterwards
    pub remaining: usize,
}

/// Outcome of a drain request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain was already in flight; nothing was done
    Skipped,
    /// The cycle ran
    Completed(DrainReport),
}

/// Releases the in-flight flag when a drain ends, even by cancellation.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Buffer of deferred requests, drained in priority order.
pub struct DeferredQueue {
    items: Mutex<Vec<QueuedRequest>>,
    next_seq: AtomicU64,
    /// Bumped by `clear`; a drain stops when it sees a newer generation
    generation: AtomicU64,
    draining: AtomicBool,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl DeferredQueue {
    /// Create an empty queue.
    pub fn new(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            draining: AtomicBool::new(false),
            clock,
            config,
        }
    }

    /// Park a job.
    pub fn enqueue(&self, job: Job, priority: Priority) {
        let request = QueuedRequest {
            job,
            priority,
            enqueued_at: self.clock.now(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        let len = {
            let mut items = self.lock();
            items.push(request);
            items.len()
        };
        tracing::debug!(priority = ?priority, queued = len, "request deferred");
    }

    /// Number of parked items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check whether nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every parked item. Returns how many were dropped.
    ///
    /// A drain in flight stops before invoking anything it took from the
    /// queue before this call.
    pub fn clear(&self) -> usize {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let mut items = self.lock();
        let dropped = items.len();
        items.clear();
        dropped
    }

    /// Queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Run one drain cycle.
    ///
    /// Takes up to `batch_size` items, highest priority first and oldest
    /// first within a priority, and invokes them sequentially with
    /// `item_spacing` between invocations. Returns `Skipped` if a drain is
    /// already running.
    pub async fn drain(&self) -> DrainOutcome {
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            tracing::debug!("drain already in flight, skipping cycle");
            return DrainOutcome::Skipped;
        };

        let generation = self.generation.load(Ordering::Acquire);
        let batch = self.take_batch();
        let mut report = DrainReport::default();

        let mut batch = batch.into_iter();
        let mut first = true;
        while let Some(item) = batch.next() {
            if !first {
                tokio::time::sleep(self.config.item_spacing).await;
            }
            first = false;

            if self.generation.load(Ordering::Acquire) != generation {
                report.discarded = 1 + batch.len();
                tracing::debug!(discarded = report.discarded, "queue cleared during drain");
                break;
            }

            report.invoked += 1;
            if let Err(error) = (item.job)().await {
                report.failed += 1;
                tracing::warn!(
                    priority = ?item.priority,
                    error = %error,
                    "deferred request failed, dropping it"
                );
            }
        }

        report.remaining = self.len();
        if report.invoked > 0 {
            tracing::debug!(
                invoked = report.invoked,
                failed = report.failed,
                remaining = report.remaining,
                "drain cycle finished"
            );
        }
        DrainOutcome::Completed(report)
    }

    /// Drain every `drain_interval` until the handle is shut down.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn start(self: &Arc<Self>) -> TaskHandle {
        let queue = Arc::clone(self);
        spawn_periodic("queue-drain", self.config.drain_interval, move || {
            let queue = Arc::clone(&queue);
            async move {
                queue.drain().await;
            }
        })
    }

    fn take_batch(&self) -> Vec<QueuedRequest> {
        let mut items = self.lock();
        items.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        let take = self.config.batch_size.min(items.len());
        items.drain(..take).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueuedRequest>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for DeferredQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredQueue")
            .field("len", &self.len())
            .field("draining", &self.draining.load(Ordering::Relaxed))
            .field("config", &self.config)
            .finish()
    }
}
