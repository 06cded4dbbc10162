//! Manual recovery from a wedged governor.
//!
//! `emergency_reset` wipes limiter, cache and queue state at once, then
//! re-warms the cache with one fetch of the primary resource after a short
//! delay. Calling it again while a warm-up is pending replaces that warm-up.

use crate::application::config::{non_zero_duration, ConfigError};
use crate::application::governor::{FetchOptions, Governor, Payload};
use crate::application::ports::RemoteCall;
use crate::domain::request::{Params, Priority};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Recovery configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Pause between the reset and the warm-up fetch
    pub warmup_delay: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            warmup_delay: Duration::from_millis(2000),
        }
    }
}

impl RecoveryConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` for a zero warm-up delay.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero_duration("warmup_delay", self.warmup_delay)
    }
}

/// The fetch replayed to re-warm state after a reset.
pub struct WarmupFetch<V> {
    /// Resource type to fetch
    pub resource_type: String,
    /// Parameters of the fetch
    pub params: Params,
    /// Remote call producing the value
    pub call: RemoteCall<V>,
}

impl<V> WarmupFetch<V> {
    /// Describe the warm-up fetch.
    pub fn new(resource_type: impl Into<String>, params: Params, call: RemoteCall<V>) -> Self {
        Self {
            resource_type: resource_type.into(),
            params,
            call,
        }
    }
}

impl<V> Clone for WarmupFetch<V> {
    fn clone(&self) -> Self {
        Self {
            resource_type: self.resource_type.clone(),
            params: self.params.clone(),
            call: self.call.clone(),
        }
    }
}

impl<V> fmt::Debug for WarmupFetch<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmupFetch")
            .field("resource_type", &self.resource_type)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Exposes the emergency reset.
pub struct RecoveryController<V: Payload> {
    governor: Governor<V>,
    warmup: WarmupFetch<V>,
    config: RecoveryConfig,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Payload> RecoveryController<V> {
    /// Create a controller for `governor` that re-warms with `warmup`.
    ///
    /// # Errors
    /// Returns `ConfigError` if `config` is invalid.
    pub fn new(
        governor: Governor<V>,
        warmup: WarmupFetch<V>,
        config: RecoveryConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            governor,
            warmup,
            config,
            pending: Mutex::new(None),
        })
    }

    /// Reset limiter, cache and queue now, then schedule the warm-up fetch.
    ///
    /// Once this returns, every key is admissible and the cache is empty.
    /// Safe to call repeatedly; each call restarts the whole sequence.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn emergency_reset(&self) {
        let governor = &self.governor;
        governor.limiter().reset();
        governor.cache().clear();
        let dropped = governor.queue().clear();
        tracing::warn!(
            dropped_requests = dropped,
            warmup_delay_ms = self.config.warmup_delay.as_millis() as u64,
            "emergency reset"
        );

        let mut pending = self.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(self.spawn_warmup());
    }

    /// Whether a warm-up is scheduled or running.
    pub fn pending_warmup(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// The governor being recovered.
    pub fn governor(&self) -> &Governor<V> {
        &self.governor
    }

    /// Recovery configuration.
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    fn spawn_warmup(&self) -> JoinHandle<()> {
        let governor = self.governor.clone();
        let warmup = self.warmup.clone();
        let delay = self.config.warmup_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let options = FetchOptions::default().with_priority(Priority::High);
            match governor
                .fetch(&warmup.resource_type, warmup.params, warmup.call, options)
                .await
            {
                Ok(outcome) => tracing::info!(
                    resource_type = %warmup.resource_type,
                    outcome = outcome.kind(),
                    "warm-up fetch finished"
                ),
                Err(error) => tracing::warn!(
                    resource_type = %warmup.resource_type,
                    error = %error,
                    "warm-up fetch failed"
                ),
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<V: Payload> fmt::Debug for RecoveryController<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryController")
            .field("warmup", &self.warmup)
            .field("config", &self.config)
            .field("pending_warmup", &self.pending_warmup())
            .finish()
    }
}
