//! In-memory snapshot slot for testing.

use crate::application::ports::SnapshotStore;
use crate::domain::snapshot::{Snapshot, SnapshotError};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Snapshot store backed by a mutex, with switchable write failures.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<Snapshot>>,
    fail_writes: AtomicBool,
    saves: AtomicUsize,
}

impl MemorySnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save` fail with an I/O error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Snapshot>> {
        self.slot
            .lock()
            .expect("MemorySnapshotStore mutex poisoned - a test thread panicked while holding the lock")
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
        Ok(self.lock().clone())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("disk full").into());
        }
        *self.lock() = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<(), SnapshotError> {
        *self.lock() = None;
        Ok(())
    }
}
