//! TTL-bounded response cache.
//!
//! Entries are keyed by resource type plus sorted parameters and expire
//! according to the resource type's TTL. Expired entries are evicted lazily
//! on read and eagerly by the periodic sweep. When the cache is full, the
//! eviction policy picks a victim (the oldest `stored_at` by default).
//!
//! Each entry carries its own `stored_at`, so a value can never exist
//! without its timestamp or the other way around.

use crate::application::config::{non_zero_duration, non_zero_limit, ConfigError};
use crate::application::ports::{Clock, EvictionCandidate, EvictionPolicy, Storage};
use crate::domain::request::{cache_key, key_prefix, Params};
use crate::domain::ttl::ResourceTypePolicy;
use crate::infrastructure::eviction::OldestEntryEviction;
use crate::infrastructure::storage::ShardedStorage;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Per-resource-type TTLs
    pub policy: ResourceTypePolicy,
    /// Maximum number of entries
    pub max_entries: usize,
    /// How often the background sweep removes expired entries
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: ResourceTypePolicy::default(),
            max_entries: 100,
            sweep_interval: Duration::from_millis(60_000),
        }
    }
}

impl CacheConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` for a zero capacity or sweep interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero_limit("max_entries", self.max_entries)?;
        non_zero_duration("sweep_interval", self.sweep_interval)
    }
}

/// A cached value and when it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    /// Full cache key (`<resource_type>:<params>`)
    pub key: String,
    /// Resource type, used to look up the TTL
    pub resource_type: String,
    /// Cached value
    pub value: V,
    /// When the value was written
    pub stored_at: Instant,
}

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<V> {
    /// Present and younger than its TTL
    Fresh(V),
    /// Present but past its TTL; it has been evicted
    Expired(V),
    /// Not present
    Missing,
}

impl<V> CacheLookup<V> {
    /// The value, if fresh.
    pub fn fresh(self) -> Option<V> {
        match self {
            CacheLookup::Fresh(value) => Some(value),
            _ => None,
        }
    }

    /// The value, fresh or expired.
    pub fn any(self) -> Option<V> {
        match self {
            CacheLookup::Fresh(value) | CacheLookup::Expired(value) => Some(value),
            CacheLookup::Missing => None,
        }
    }
}

/// Read-only view of cache state for observability.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Entries currently stored
    pub total_entries: usize,
    /// Stored entries still within their TTL
    pub valid_entries: usize,
    /// Stored entries past their TTL, awaiting eviction
    pub expired_entries: usize,
    /// Capacity
    pub max_size: usize,
    /// `total_entries / max_size`, formatted like `"42.0%"`
    pub usage_percent: String,
    /// Reads served from the cache
    pub hits: u64,
    /// Reads that found nothing fresh
    pub misses: u64,
    /// Entries evicted because they expired
    pub expired_evictions: u64,
    /// Entries evicted to make room
    pub capacity_evictions: u64,
}

impl CacheStats {
    /// Fraction of reads served from the cache (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits.saturating_add(self.misses);
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired_evictions: AtomicU64,
    capacity_evictions: AtomicU64,
}

/// Key/value cache with per-resource-type expiry and bounded capacity.
pub struct TtlCache<V, S = ShardedStorage<String, CacheEntry<V>>>
where
    V: Clone + Send + Sync,
    S: Storage<String, CacheEntry<V>>,
{
    storage: S,
    eviction: Arc<dyn EvictionPolicy<String, CacheEntry<V>>>,
    policy: ResourceTypePolicy,
    clock: Arc<dyn Clock>,
    counters: Counters,
    /// Serializes writers so eviction and insertion happen as one step
    write_lock: Mutex<()>,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache with sharded storage and oldest-entry eviction.
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_parts(
            ShardedStorage::with_capacity(config.max_entries),
            Arc::new(OldestEntryEviction::new(config.max_entries)),
            config.policy.clone(),
            clock,
        )
    }
}

impl<V, S> TtlCache<V, S>
where
    V: Clone + Send + Sync,
    S: Storage<String, CacheEntry<V>>,
{
    /// Create a cache from explicit storage and eviction adapters.
    pub fn with_parts(
        storage: S,
        eviction: Arc<dyn EvictionPolicy<String, CacheEntry<V>>>,
        policy: ResourceTypePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            eviction,
            policy,
            clock,
            counters: Counters::default(),
            write_lock: Mutex::new(()),
        }
    }

    /// Read a fresh value.
    ///
    /// An expired entry is evicted and reported as a miss.
    pub fn get(&self, resource_type: &str, params: &Params) -> Option<V> {
        self.lookup(resource_type, params).fresh()
    }

    /// Read a value and report whether it is fresh, expired or missing.
    ///
    /// An expired entry is evicted, but its value is handed back so the
    /// caller can still serve it as stale data.
    pub fn lookup(&self, resource_type: &str, params: &Params) -> CacheLookup<V> {
        let key = cache_key(resource_type, params);
        let entry = match self.storage.get(&key) {
            Some(entry) => entry,
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return CacheLookup::Missing;
            }
        };

        let now = self.clock.now();
        if self.is_fresh(&entry, now) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return CacheLookup::Fresh(entry.value);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        {
            let _guard = self.write_guard();
            // Only evict the version we judged expired, not a concurrent re-set
            let unchanged = self
                .storage
                .get(&key)
                .is_some_and(|current| current.stored_at == entry.stored_at);
            if unchanged {
                self.storage.remove(&key);
                self.counters
                    .expired_evictions
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
        tracing::debug!(key = %key, "cache entry expired");
        CacheLookup::Expired(entry.value)
    }

    /// Store a value, resetting its freshness.
    ///
    /// When the cache is full and the key is new, one entry is evicted first.
    pub fn set(&self, resource_type: &str, params: &Params, value: V) {
        let key = cache_key(resource_type, params);
        let _guard = self.write_guard();

        if !self.storage.contains_key(&key) && self.eviction.should_evict(self.storage.len()) {
            self.evict_one();
        }

        let entry = CacheEntry {
            key: key.clone(),
            resource_type: resource_type.to_string(),
            value,
            stored_at: self.clock.now(),
        };
        self.storage.insert(key, entry);
    }

    /// Remove every entry of a resource type. Returns how many were removed.
    pub fn invalidate(&self, resource_type: &str) -> usize {
        let prefix = key_prefix(resource_type);
        let _guard = self.write_guard();
        let before = self.storage.len();
        self.storage.retain(|key, _| !key.starts_with(&prefix));
        let removed = before.saturating_sub(self.storage.len());
        tracing::debug!(resource_type, removed, "cache invalidated");
        removed
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let _guard = self.write_guard();
        self.storage.clear();
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let _guard = self.write_guard();
        let before = self.storage.len();
        self.storage.retain(|_, entry| self.is_fresh(entry, now));
        let removed = before.saturating_sub(self.storage.len());
        if removed > 0 {
            self.counters
                .expired_evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
            tracing::debug!(removed, "cache sweep removed expired entries");
        }
        removed
    }

    /// Snapshot entry counts and hit/miss accounting.
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let mut total = 0usize;
        let mut valid = 0usize;
        self.storage.for_each(|_, entry| {
            total += 1;
            if self.is_fresh(entry, now) {
                valid += 1;
            }
        });

        let max_size = self.eviction.capacity();
        let usage = if max_size == 0 {
            0.0
        } else {
            total as f64 / max_size as f64 * 100.0
        };

        CacheStats {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
            max_size,
            usage_percent: format!("{usage:.1}%"),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired_evictions: self.counters.expired_evictions.load(Ordering::Relaxed),
            capacity_evictions: self.counters.capacity_evictions.load(Ordering::Relaxed),
        }
    }

    /// Number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// TTL applied to a resource type.
    pub fn ttl_for(&self, resource_type: &str) -> Duration {
        self.policy.ttl_for(resource_type)
    }

    fn is_fresh(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.stored_at) < self.policy.ttl_for(&entry.resource_type)
    }

    /// Evict one entry chosen by the policy. Caller holds the write lock.
    fn evict_one(&self) {
        let mut candidates = Vec::with_capacity(self.storage.len());
        self.storage.for_each(|key, entry| {
            candidates.push(EvictionCandidate {
                key: key.clone(),
                value: entry.clone(),
                stored_at: entry.stored_at,
            });
        });

        if let Some(victim) = self.eviction.select_victim(&candidates) {
            self.storage.remove(&victim);
            self.counters
                .capacity_evictions
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %victim, "cache full, evicted oldest entry");
        }
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<V, S> fmt::Debug for TtlCache<V, S>
where
    V: Clone + Send + Sync,
    S: Storage<String, CacheEntry<V>>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("entries", &self.storage.len())
            .field("eviction", &self.eviction)
            .finish()
    }
}
