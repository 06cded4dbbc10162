//! Mock implementations for testing.
//!
//! Test doubles for the infrastructure adapters, so application logic can
//! be driven deterministically.

pub mod clock;
pub mod layer;
pub mod snapshot;

pub use clock::MockClock;
pub use layer::{CapturedEvent, MockCaptureLayer};
pub use snapshot::MemorySnapshotStore;
