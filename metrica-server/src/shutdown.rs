//! Graceful shutdown for the collector server.
//!
//! After the HTTP server stops accepting requests, background loops are
//! drained and the store gets one final backup flush, all within the grace
//! period.

use metrica_core::shutdown::{drain, GRACE_PERIOD};
use metrica_core::BackupManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{error, info, warn};

/// Runs the server's shutdown sequence.
pub struct ShutdownManager {
    backup: Arc<BackupManager>,
    grace: Duration,
}

impl ShutdownManager {
    pub fn new(backup: Arc<BackupManager>) -> Self {
        Self { backup, grace: GRACE_PERIOD }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Drain `tasks`, then write a final unconditional snapshot.
    ///
    /// Returns `true` when the final snapshot was written in time.
    pub async fn shutdown(&self, tasks: Vec<JoinHandle<()>>) -> bool {
        info!(grace_secs = self.grace.as_secs(), "Starting graceful shutdown...");
        let deadline = Instant::now() + self.grace;

        drain(tasks, self.grace).await;

        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, self.backup.snapshot_store()).await {
            Ok(Ok(())) => {
                info!(path = %self.backup.path().display(), "Final backup written");
                true
            }
            Ok(Err(e)) => {
                error!(error = %e, "Final backup failed");
                false
            }
            Err(_) => {
                warn!("Final backup did not finish within the grace period");
                false
            }
        }
    }
}
