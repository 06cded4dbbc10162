//! Domain layer - pure types with no I/O and no clock reads.
//!
//! - Endpoint normalization (canonical tracking keys)
//! - Sliding-window counters
//! - Per-resource-type TTL policies
//! - Request parameters, priorities and remote failures
//! - The persisted last-known-good snapshot

pub mod endpoint;
pub mod request;
pub mod snapshot;
pub mod ttl;
pub mod window;
