//! Per-resource-type freshness policies.
//!
//! Rarely-changing resources (the business record, settings) stay fresh for
//! a long time; volatile ones (contacts, campaigns, sales) expire quickly.
//! Resource types are matched against an ordered table of substrings; the
//! first pattern contained in the resource type wins, otherwise the default
//! TTL applies.

use std::time::Duration;
use thiserror::Error;

/// Error returned when a TTL policy is constructed with invalid durations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TtlPolicyError {
    /// The default TTL must be greater than zero
    #[error("default TTL must be greater than 0")]
    ZeroDefaultTtl,
    /// A per-pattern TTL must be greater than zero
    #[error("TTL for pattern `{pattern}` must be greater than 0")]
    ZeroPatternTtl {
        /// The offending pattern
        pattern: String,
    },
    /// Patterns must be non-empty, otherwise they would match every resource
    #[error("TTL patterns must not be empty")]
    EmptyPattern,
}

/// Ordered mapping from resource-type substrings to TTLs.
///
/// All TTLs are guaranteed to be greater than zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTypePolicy {
    rules: Vec<(String, Duration)>,
    default_ttl: Duration,
}

impl ResourceTypePolicy {
    /// Create a policy with no patterns, only a default TTL.
    ///
    /// # Errors
    /// Returns `TtlPolicyError::ZeroDefaultTtl` if `default_ttl` is zero.
    pub fn new(default_ttl: Duration) -> Result<Self, TtlPolicyError> {
        if default_ttl.is_zero() {
            return Err(TtlPolicyError::ZeroDefaultTtl);
        }
        Ok(Self {
            rules: Vec::new(),
            default_ttl,
        })
    }

    /// Append a pattern rule. Earlier rules take precedence.
    ///
    /// # Errors
    /// Returns an error if the pattern is empty or the TTL is zero.
    pub fn with_rule(
        mut self,
        pattern: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, TtlPolicyError> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(TtlPolicyError::EmptyPattern);
        }
        if ttl.is_zero() {
            return Err(TtlPolicyError::ZeroPatternTtl { pattern });
        }
        self.rules.push((pattern, ttl));
        Ok(self)
    }

    /// TTL for a resource type.
    pub fn ttl_for(&self, resource_type: &str) -> Duration {
        self.rules
            .iter()
            .find(|(pattern, _)| resource_type.contains(pattern.as_str()))
            .map(|(_, ttl)| *ttl)
            .unwrap_or(self.default_ttl)
    }

    /// TTL applied when no pattern matches.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Configured pattern rules in precedence order.
    pub fn rules(&self) -> &[(String, Duration)] {
        &self.rules
    }
}

impl Default for ResourceTypePolicy {
    /// Reference table:
    /// - `business`: 30 min
    /// - `settings`: 15 min
    /// - `products`, `employees`: 10 min
    /// - `contacts`: 2 min
    /// - `campaigns`, `sales`: 1 min
    /// - anything else: 5 min
    fn default() -> Self {
        const MINUTE: u64 = 60;
        Self {
            rules: vec![
                ("business".to_string(), Duration::from_secs(30 * MINUTE)),
                ("settings".to_string(), Duration::from_secs(15 * MINUTE)),
                ("products".to_string(), Duration::from_secs(10 * MINUTE)),
                ("employees".to_string(), Duration::from_secs(10 * MINUTE)),
                ("contacts".to_string(), Duration::from_secs(2 * MINUTE)),
                ("campaigns".to_string(), Duration::from_secs(MINUTE)),
                ("sales".to_string(), Duration::from_secs(MINUTE)),
            ],
            default_ttl: Duration::from_secs(5 * MINUTE),
        }
    }
}
