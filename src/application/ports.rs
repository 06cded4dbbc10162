//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::request::RemoteError;
use crate::domain::snapshot::{Snapshot, SnapshotError};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Owned, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Port for the remote data store: an opaque, fallible, repeatable call.
///
/// The governor may invoke it more than once (retries, deferred replay), so
/// it is `Fn` rather than `FnOnce`.
pub type RemoteCall<V> = Arc<dyn Fn() -> BoxFuture<'static, Result<V, RemoteError>> + Send + Sync>;

/// Wrap an async closure as a [`RemoteCall`].
///
/// ```
/// use request_governor::{remote_call, RemoteError};
///
/// let call = remote_call(|| async { Ok::<_, RemoteError>(42u32) });
/// # let _ = call;
/// ```
pub fn remote_call<V, F, Fut>(f: F) -> RemoteCall<V>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, RemoteError>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, Result<V, RemoteError>> { Box::pin(f()) })
}

/// Candidate entry for eviction consideration.
///
/// Values are cloned to avoid lifetime issues with concurrent map guards.
pub struct EvictionCandidate<K, V> {
    /// The key of the entry
    pub key: K,
    /// The value of the entry (cloned)
    pub value: V,
    /// When the entry was last written
    pub stored_at: Instant,
}

/// Port for eviction policy decisions.
///
/// The cache delegates the choice of victim to a pluggable policy when it
/// is full. Infrastructure provides concrete implementations
/// (`OldestEntryEviction`).
pub trait EvictionPolicy<K, V>: Send + Sync + Debug
where
    K: Clone,
    V: Clone,
{
    /// Select a victim from the given candidates for eviction.
    ///
    /// # Returns
    /// The key of the entry to evict, or None if no eviction should occur
    fn select_victim(&self, candidates: &[EvictionCandidate<K, V>]) -> Option<K>;

    /// Check if inserting a new key requires evicting one first.
    fn should_evict(&self, current_entries: usize) -> bool;

    /// Maximum number of entries this policy allows.
    fn capacity(&self) -> usize;
}

/// Port for obtaining current time.
///
/// Infrastructure provides concrete implementations (`SystemClock`, `MockClock`).
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;
}

/// Port for concurrent key-value storage.
///
/// Infrastructure provides concrete implementations (`ShardedStorage`).
pub trait Storage<K, V>: Send + Sync + Debug
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    /// Get a copy of the value stored under `key`.
    fn get(&self, key: &K) -> Option<V>;

    /// Insert or overwrite a value, returning the previous one.
    fn insert(&self, key: K, value: V) -> Option<V>;

    /// Remove a key, returning its value.
    fn remove(&self, key: &K) -> Option<V>;

    /// Check whether a key is present.
    fn contains_key(&self, key: &K) -> bool;

    /// Get the number of entries in the storage.
    fn len(&self) -> usize;

    /// Check if the storage is empty.
    fn is_empty(&self) -> bool;

    /// Clear all entries from the storage.
    fn clear(&self);

    /// Iterate over all entries, providing access to both key and value.
    fn for_each<F>(&self, f: F)
    where
        F: FnMut(&K, &V);

    /// Remove entries for which the predicate returns false.
    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool;
}

/// Port for the single persisted last-known-good slot.
///
/// Infrastructure provides `FileSnapshotStore`; tests use `MemorySnapshotStore`.
pub trait SnapshotStore: Send + Sync + Debug {
    /// Read the slot. `Ok(None)` when nothing was saved yet.
    fn load(&self) -> Result<Option<Snapshot>, SnapshotError>;

    /// Overwrite the slot.
    fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError>;

    /// Empty the slot.
    fn clear(&self) -> Result<(), SnapshotError>;
}
