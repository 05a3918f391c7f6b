use crate::delivery::DeliveryJob;
use crate::error::MetricaError;
use crate::store::MetricStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Turns the store into one delivery job per report interval.
pub struct ReportScheduler;

impl ReportScheduler {
    /// Run until shutdown.
    ///
    /// A failed store read is forwarded to `errors` and the tick skipped.
    /// No job is pushed after shutdown is observed; dropping `jobs` on
    /// return closes the channel and ends the workers.
    pub async fn run(
        store: Arc<dyn MetricStore>,
        interval: Duration,
        jobs: mpsc::Sender<DeliveryJob>,
        errors: mpsc::Sender<MetricaError>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(interval_secs = interval.as_secs(), "Starting report loop");
        let mut ticker = super::ticker(interval);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = match store.get_all_metrics().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(error = %e, "Cannot read store for report");
                    let _ = errors.send(e).await;
                    continue;
                }
            };

            debug!(metrics = snapshot.len(), "Queueing report");
            tokio::select! {
                _ = shutdown.recv() => break,
                sent = jobs.send(DeliveryJob { snapshot }) => {
                    if sent.is_err() {
                        warn!("Delivery workers gone, stopping report loop");
                        break;
                    }
                }
            }
        }
        info!("Report loop stopped");
    }
}
