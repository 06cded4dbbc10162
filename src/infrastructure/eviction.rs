//! Oldest-entry eviction adapter.

use crate::application::ports::{EvictionCandidate, EvictionPolicy};

/// Evicts the entry with the smallest `stored_at` once the limit is reached.
///
/// Re-setting a key refreshes its `stored_at`, so this is "least recently
/// written" rather than "least recently read": reads never reorder entries.
#[derive(Debug, Clone)]
pub struct OldestEntryEviction {
    /// Maximum number of entries before eviction
    max_entries: usize,
}

impl OldestEntryEviction {
    /// Create a policy with the given entry limit.
    pub fn new(max_entries: usize) -> Self {
        Self { max_entries }
    }
}

impl<K, V> EvictionPolicy<K, V> for OldestEntryEviction
where
    K: Clone,
    V: Clone,
{
    fn select_victim(&self, candidates: &[EvictionCandidate<K, V>]) -> Option<K> {
        candidates
            .iter()
            .min_by_key(|candidate| candidate.stored_at)
            .map(|candidate| candidate.key.clone())
    }

    fn should_evict(&self, current_entries: usize) -> bool {
        current_entries >= self.max_entries
    }

    fn capacity(&self) -> usize {
        self.max_entries
    }
}
