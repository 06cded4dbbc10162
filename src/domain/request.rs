//! Request vocabulary shared by the cache, queue and governor.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Error code a remote store uses to signal connection/resource exhaustion.
pub const INSUFFICIENT_RESOURCES: &str = "INSUFFICIENT_RESOURCES";

/// Request parameters.
///
/// A `BTreeMap` keeps parameters sorted, so two parameter sets with the same
/// entries always produce the same cache key regardless of insertion order.
pub type Params = BTreeMap<String, serde_json::Value>;

/// Build a cache key from a resource type and its parameters.
///
/// The key always starts with `"<resource_type>:"`, which is what
/// invalidation by resource type relies on.
pub fn cache_key(resource_type: &str, params: &Params) -> String {
    // Serializing a map of JSON values cannot fail
    let encoded = serde_json::to_string(params).unwrap_or_default();
    format!("{}{}", key_prefix(resource_type), encoded)
}

/// Prefix shared by every cache key of a resource type.
pub fn key_prefix(resource_type: &str) -> String {
    format!("{resource_type}:")
}

/// Scheduling priority for deferred requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    /// Drained after every high-priority request.
    #[default]
    Normal,
    /// Drained first.
    High,
}

/// Structured failure returned by a remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Human-readable message, preserved verbatim up to the caller.
    pub message: String,
    /// Optional machine-readable code.
    pub code: Option<String>,
}

impl RemoteError {
    /// Create an error with a message and no code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Create an error with a message and a code.
    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// Create the upstream resource-exhaustion error.
    pub fn insufficient_resources(message: impl Into<String>) -> Self {
        Self::with_code(message, INSUFFICIENT_RESOURCES)
    }

    /// Whether this failure signals upstream resource exhaustion.
    ///
    /// Either the code is `INSUFFICIENT_RESOURCES` or the message mentions it.
    pub fn is_resource_exhaustion(&self) -> bool {
        self.code.as_deref() == Some(INSUFFICIENT_RESOURCES)
            || self.message.contains(INSUFFICIENT_RESOURCES)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}
