use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::gateway::UploadGateway;

/// Background task that reclaims abandoned upload sessions and re-drives
/// the completion outbox.
///
/// Runs on a fixed interval; each tick is independent, so a failed pass
/// just waits for the next one.
pub struct SessionSweeper {
    gateway: Arc<UploadGateway>,
    interval: Duration,
}

/// Handle for a running sweeper. Dropping it without calling
/// [`SweeperHandle::shutdown`] aborts the task.
pub struct SweeperHandle {
    shutdown_tx: oneshot::Sender<()>,
    join: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join.await;
    }
}

impl SessionSweeper {
    pub fn new(gateway: Arc<UploadGateway>, interval: Duration) -> Self {
        Self { gateway, interval }
    }

    /// One sweep pass. Exposed so tests and callers can drive it
    /// without the timer.
    pub async fn run_once(&self) -> usize {
        let flushed = self.gateway.flush_outbox().await;
        if flushed > 0 {
            debug!(flushed, "re-published parked completion events");
        }
        match self.gateway.sweep_expired().await {
            Ok(reclaimed) => reclaimed,
            Err(e) => {
                warn!(error = %e, "session sweep failed");
                0
            }
        }
    }

    /// Spawn the sweep loop.
    pub fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("session sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
        });
        SweeperHandle { shutdown_tx, join }
    }
}
