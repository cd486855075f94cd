//! # Periodic
//!
//! Drives [Destination::flush] from a tokio interval for hosts without a scheduler
//! of their own. Flushes run on the blocking pool since they hold the destination
//! lock across the network call.

use crate::destination::Destination;
use crate::error::{Error, Result};
use crate::flush::FlushOutcome;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, warn};

/// Background task flushing one destination every `period`
pub struct FlushTask {
    handle: JoinHandle<()>,
    destination: Arc<Destination>,
}

impl FlushTask {
    /// Starts the task on the current tokio runtime
    ///
    /// Each tick asks for a flush with `period` as timeout, so a buffer that was
    /// just emptied by an overflow is left alone. A zero `period` is refused.
    pub fn spawn(destination: Arc<Destination>, period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(Error::Config("flush period must be non-zero".into()));
        }

        let task_destination = Arc::clone(&destination);
        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let destination = Arc::clone(&task_destination);
                match tokio::task::spawn_blocking(move || destination.flush(period)).await {
                    Ok(Ok(outcome)) => debug!(destination = %task_destination.name(), ?outcome, "periodic flush"),
                    Ok(Err(e)) => warn!(destination = %task_destination.name(), "periodic flush failed: {e}"),
                    Err(e) => error!(destination = %task_destination.name(), "periodic flush aborted: {e}"),
                }
            }
        });

        Ok(Self { handle, destination })
    }

    /// Stops the timer and sends whatever is left in the buffer
    pub async fn shutdown(self) -> Result<FlushOutcome> {
        self.handle.abort();
        let _ = self.handle.await;

        let destination = self.destination;
        tokio::task::spawn_blocking(move || destination.flush(Duration::ZERO))
            .await
            .map_err(|e| Error::Transport(format!("final flush aborted: {e}")))?
    }
}

/// Shorthand for [FlushTask::spawn]
pub fn spawn_flush_task(destination: Arc<Destination>, period: Duration) -> Result<FlushTask> {
    FlushTask::spawn(destination, period)
}
