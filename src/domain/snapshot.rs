//! Last-known-good snapshot of the primary resource.
//!
//! A single slot survives process restarts: the most recent successful
//! result for the primary resource type. It is consulted only as a stale
//! fallback when nothing fresher is available.

use crate::domain::request::Params;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persisted snapshot of one successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Resource type the value was fetched for.
    pub resource_type: String,
    /// Parameters of the fetch.
    pub params: Params,
    /// The fetched value.
    pub value: serde_json::Value,
    /// Wall-clock save time, milliseconds since the Unix epoch.
    pub saved_at_unix_ms: u64,
}

impl Snapshot {
    /// Whether this snapshot can stand in for a fetch of `resource_type`.
    ///
    /// Parameters are ignored: the slot holds the single most important
    /// record, and any version of it beats an error.
    pub fn serves(&self, resource_type: &str) -> bool {
        self.resource_type == resource_type
    }
}

/// Error raised by snapshot persistence.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Reading or writing the slot failed
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The slot contents could not be encoded or decoded
    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}
