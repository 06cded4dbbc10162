//! Periodic background tasks with explicit shutdown.
//!
//! The queue drain and the cache sweep each run as their own tokio task.
//! A task keeps running until its [`TaskHandle`] is shut down; dropping the
//! handle detaches the task instead of stopping it.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Error returned when stopping a background task.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The task panicked before it could be stopped
    #[error("background task `{task}` panicked")]
    Panicked {
        /// Task name
        task: &'static str,
    },
    /// The task was aborted from elsewhere
    #[error("background task `{task}` was cancelled")]
    Cancelled {
        /// Task name
        task: &'static str,
    },
}

/// Handle owning one periodic background task.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Task name, as used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the task to stop and wait for it to exit.
    ///
    /// A tick already in progress runs to completion first.
    ///
    /// # Errors
    /// Returns `ShutdownError` if the task panicked or was aborted.
    pub async fn shutdown(self) -> Result<(), ShutdownError> {
        // The receiver is gone only if the task already exited
        let _ = self.shutdown_tx.send(());
        match self.join.await {
            Ok(()) => {
                tracing::debug!(task = self.name, "background task stopped");
                Ok(())
            }
            Err(err) if err.is_panic() => Err(ShutdownError::Panicked { task: self.name }),
            Err(_) => Err(ShutdownError::Cancelled { task: self.name }),
        }
    }
}

/// Run `tick` every `period`, starting one period from now.
///
/// Ticks never overlap: a slow tick delays the next one and missed ticks
/// are skipped rather than replayed in a burst.
///
/// # Panics
/// Panics if called outside a tokio runtime.
pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let join = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => tick().await,
            }
        }
    });

    tracing::debug!(task = name, period_ms = period.as_millis() as u64, "background task started");
    TaskHandle {
        name,
        shutdown_tx,
        join,
    }
}
