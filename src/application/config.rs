//! Configuration validation errors.
//!
//! Each component owns its config struct (`LimiterConfig`, `CacheConfig`,
//! `QueueConfig`, `RetryConfig`, `RecoveryConfig`); all of them report
//! invalid values through `ConfigError`.

use crate::domain::ttl::TtlPolicyError;
use thiserror::Error;

/// Error returned when a component configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A duration that drives a window, timer or backoff was zero
    #[error("{field} must be greater than 0")]
    ZeroDuration {
        /// Name of the offending setting
        field: &'static str,
    },
    /// A count limit was zero
    #[error("{field} must be greater than 0")]
    ZeroLimit {
        /// Name of the offending setting
        field: &'static str,
    },
    /// The per-key cap can never be reached before the global cap trips
    #[error("max_per_key ({max_per_key}) must not exceed max_global ({max_global})")]
    PerKeyAboveGlobal {
        /// Configured per-key cap
        max_per_key: usize,
        /// Configured global cap
        max_global: usize,
    },
    /// The TTL table is invalid
    #[error("invalid TTL policy: {0}")]
    TtlPolicy(#[from] TtlPolicyError),
}

/// Reject zero durations.
pub(crate) fn non_zero_duration(
    field: &'static str,
    value: std::time::Duration,
) -> Result<(), ConfigError> {
    if value.is_zero() {
        Err(ConfigError::ZeroDuration { field })
    } else {
        Ok(())
    }
}

/// Reject zero limits.
pub(crate) fn non_zero_limit(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::ZeroLimit { field })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_non_zero_duration() {
        assert!(non_zero_duration("window", Duration::from_millis(1)).is_ok());
        assert_eq!(
            non_zero_duration("window", Duration::ZERO),
            Err(ConfigError::ZeroDuration { field: "window" })
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ConfigError::ZeroLimit { field: "batch_size" }.to_string(),
            "batch_size must be greater than 0"
        );
        assert_eq!(
            ConfigError::from(TtlPolicyError::ZeroDefaultTtl).to_string(),
            "invalid TTL policy: default TTL must be greater than 0"
        );
    }
}
