//! Composition root: wires adapters into a [`Governor`].

use crate::application::cache::{CacheConfig, TtlCache};
use crate::application::config::ConfigError;
use crate::application::governor::{Governor, GovernorParts, Payload, RetryConfig};
use crate::application::limiter::{LimiterConfig, SlidingWindowLimiter};
use crate::application::ports::{Clock, SnapshotStore};
use crate::application::queue::{DeferredQueue, QueueConfig};
use crate::domain::snapshot::Snapshot;
use crate::domain::ttl::ResourceTypePolicy;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::snapshot::FileSnapshotStore;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Resource type persisted as the last-known-good snapshot by default.
pub const DEFAULT_PRIMARY_RESOURCE: &str = "business";

/// Error returned when building a `Governor` fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A component configuration is invalid
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// The primary resource type is empty
    #[error("primary resource type must not be empty")]
    EmptyPrimaryResource,
}

/// Builder for constructing a [`Governor`].
///
/// Every setting has a default; values are validated by [`build`](Self::build).
///
/// ```
/// use request_governor::GovernorBuilder;
/// use std::time::Duration;
///
/// let governor = GovernorBuilder::new()
///     .with_max_global(50)
///     .with_backoff(Duration::from_secs(10))
///     .with_max_cache_entries(500)
///     .build::<serde_json::Value>()
///     .unwrap();
/// assert_eq!(governor.limiter().config().max_global, 50);
/// ```
pub struct GovernorBuilder {
    limiter: LimiterConfig,
    cache: CacheConfig,
    queue: QueueConfig,
    retry: RetryConfig,
    primary_resource: String,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl GovernorBuilder {
    /// Start from the default policy.
    pub fn new() -> Self {
        Self {
            limiter: LimiterConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            retry: RetryConfig::default(),
            primary_resource: DEFAULT_PRIMARY_RESOURCE.to_string(),
            snapshot_store: None,
            clock: None,
        }
    }

    /// Replace the whole limiter policy.
    pub fn with_limiter_config(mut self, config: LimiterConfig) -> Self {
        self.limiter = config;
        self
    }

    /// Set the sliding window length.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.limiter.window = window;
        self
    }

    /// Set the global cap per window.
    pub fn with_max_global(mut self, max_global: usize) -> Self {
        self.limiter.max_global = max_global;
        self
    }

    /// Set the per-key cap per window.
    pub fn with_max_per_key(mut self, max_per_key: usize) -> Self {
        self.limiter.max_per_key = max_per_key;
        self
    }

    /// Set how long a tripped breaker refuses traffic.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.limiter.backoff = backoff;
        self
    }

    /// Replace the whole cache configuration.
    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Set the per-resource-type TTL table.
    pub fn with_ttl_policy(mut self, policy: ResourceTypePolicy) -> Self {
        self.cache.policy = policy;
        self
    }

    /// Set the cache capacity.
    pub fn with_max_cache_entries(mut self, max_entries: usize) -> Self {
        self.cache.max_entries = max_entries;
        self
    }

    /// Set how often expired cache entries are swept.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.cache.sweep_interval = interval;
        self
    }

    /// Replace the whole queue configuration.
    pub fn with_queue_config(mut self, config: QueueConfig) -> Self {
        self.queue = config;
        self
    }

    /// Replace the retry policy.
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Set the default retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Set the resource type whose successes are persisted.
    pub fn with_primary_resource(mut self, resource_type: impl Into<String>) -> Self {
        self.primary_resource = resource_type.into();
        self
    }

    /// Persist the snapshot as JSON at `path`.
    pub fn with_snapshot_path(self, path: impl Into<PathBuf>) -> Self {
        self.with_snapshot_store(Arc::new(FileSnapshotStore::new(path)))
    }

    /// Persist the snapshot through a custom store.
    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    /// Set a custom clock (mainly for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the governor.
    ///
    /// A snapshot that cannot be loaded is logged and ignored.
    ///
    /// # Errors
    /// Returns `BuildError` if any configuration is invalid.
    pub fn build<V: Payload>(self) -> Result<Governor<V>, BuildError> {
        self.limiter.validate()?;
        self.cache.validate()?;
        self.queue.validate()?;
        self.retry.validate()?;
        if self.primary_resource.trim().is_empty() {
            return Err(BuildError::EmptyPrimaryResource);
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let last_good = self.snapshot_store.as_ref().and_then(load_snapshot);

        Ok(Governor::from_parts(GovernorParts {
            limiter: SlidingWindowLimiter::new(self.limiter, Arc::clone(&clock)),
            cache: TtlCache::new(&self.cache, Arc::clone(&clock)),
            queue: DeferredQueue::new(self.queue, clock),
            retry: self.retry,
            sweep_interval: self.cache.sweep_interval,
            primary_resource: self.primary_resource,
            snapshot_store: self.snapshot_store,
            last_good,
        }))
    }
}

impl Default for GovernorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GovernorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GovernorBuilder")
            .field("limiter", &self.limiter)
            .field("cache", &self.cache)
            .field("queue", &self.queue)
            .field("retry", &self.retry)
            .field("primary_resource", &self.primary_resource)
            .field("snapshot_store", &self.snapshot_store)
            .finish_non_exhaustive()
    }
}

fn load_snapshot(store: &Arc<dyn SnapshotStore>) -> Option<Snapshot> {
    match store.load() {
        Ok(Some(snapshot)) => {
            tracing::info!(
                resource_type = %snapshot.resource_type,
                saved_at_unix_ms = snapshot.saved_at_unix_ms,
                "loaded last-known-good snapshot"
            );
            Some(snapshot)
        }
        Ok(None) => None,
        Err(error) => {
            tracing::warn!(error = %error, "could not load snapshot, starting without one");
            None
        }
    }
}
