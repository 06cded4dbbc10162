//! Endpoint normalization for admission tracking.
//!
//! Structurally similar requests share one tracking key so the limiter
//! throttles them together. A request is described by the resource it
//! targets and the shape of the operation:
//! - existence checks (bounded result, minimal projection) collapse to
//!   `<resource>_check`
//! - owner/tenant scoped queries collapse to `<resource>_by_owner`
//! - everything else is tracked under the bare resource name
//!
//! Descriptors without a usable resource name map to `"unknown"`, so an
//! unresolvable request is grouped coarsely instead of escaping limits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tracking key for requests that could not be attributed to a resource.
pub const UNKNOWN_KEY: &str = "unknown";

const EXISTENCE_SUFFIX: &str = "_check";
const OWNER_SUFFIX: &str = "_by_owner";

/// Shape of a remote operation, as far as admission control cares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestShape {
    /// Bounded, minimal-projection probe ("does this record exist?").
    ExistenceCheck,
    /// Query filtered by an owner or tenant.
    OwnerScoped,
    /// Any other read or write.
    Plain,
}

/// Raw description of a request before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// Target resource (table, collection, endpoint). `None` when unknown.
    pub resource: Option<String>,
    /// Operation shape.
    pub shape: RequestShape,
}

impl RequestDescriptor {
    /// Describe a plain request against `resource`.
    pub fn plain(resource: impl Into<String>) -> Self {
        Self {
            resource: Some(resource.into()),
            shape: RequestShape::Plain,
        }
    }

    /// Describe an existence check against `resource`.
    pub fn existence_check(resource: impl Into<String>) -> Self {
        Self {
            resource: Some(resource.into()),
            shape: RequestShape::ExistenceCheck,
        }
    }

    /// Describe an owner/tenant scoped query against `resource`.
    pub fn owner_scoped(resource: impl Into<String>) -> Self {
        Self {
            resource: Some(resource.into()),
            shape: RequestShape::OwnerScoped,
        }
    }

    /// Describe a request whose target could not be determined.
    pub fn unresolved() -> Self {
        Self {
            resource: None,
            shape: RequestShape::Plain,
        }
    }

    /// Compute the canonical tracking key for this descriptor.
    pub fn normalize(&self) -> CanonicalKey {
        normalize(self)
    }
}

/// Canonical key under which the limiter tracks a class of requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    /// Wrap an already-canonical key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key used for unresolvable descriptors.
    pub fn unknown() -> Self {
        Self(UNKNOWN_KEY.to_string())
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CanonicalKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// Map a descriptor to its canonical tracking key.
///
/// Pure and deterministic: equal descriptors always produce equal keys.
pub fn normalize(descriptor: &RequestDescriptor) -> CanonicalKey {
    let resource = match descriptor.resource.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => return CanonicalKey::unknown(),
    };

    match descriptor.shape {
        RequestShape::ExistenceCheck => CanonicalKey(format!("{resource}{EXISTENCE_SUFFIX}")),
        RequestShape::OwnerScoped => CanonicalKey(format!("{resource}{OWNER_SUFFIX}")),
        RequestShape::Plain => CanonicalKey(resource.to_string()),
    }
}
