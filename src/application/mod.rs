//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain types and owns all runtime state:
//! - Sliding-window limiter and its circuit breaker
//! - TTL cache
//! - Deferred request queue and the background task scheduler
//! - The governor façade and the recovery controller
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod governor;
pub mod limiter;
pub mod metrics;
pub mod ports;
pub mod queue;
pub mod recovery;
pub mod scheduler;
