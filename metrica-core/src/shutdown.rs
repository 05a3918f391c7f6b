//! Process shutdown signalling.
//!
//! One broadcast channel fans SIGINT/SIGTERM out to every background loop.
//! After the signal each binary has [`GRACE_PERIOD`] to finish in-flight
//! work before exiting.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Time allowed for loops to stop and final work to finish after a signal.
pub const GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Spawn a listener for SIGINT/SIGTERM and return the fan-out sender.
///
/// Loops take their receiver with `subscribe()`.
pub fn shutdown_signal() -> broadcast::Sender<()> {
    let (tx, _) = broadcast::channel(1);
    let notify = tx.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = notify.send(());
    });

    tx
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Wait for `handles` until `deadline` elapses, then abort the rest.
///
/// Returns `true` when every task finished on its own.
pub async fn drain(handles: Vec<JoinHandle<()>>, deadline: Duration) -> bool {
    let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
    let joined = tokio::time::timeout(deadline, async {
        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(error = %e, "Background task panicked");
                }
            }
        }
    })
    .await;

    if joined.is_err() {
        warn!(tasks = aborts.len(), "Grace period elapsed, aborting remaining tasks");
        for abort in aborts {
            abort.abort();
        }
        return false;
    }
    true
}
