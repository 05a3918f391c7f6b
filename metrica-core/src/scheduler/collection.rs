use crate::error::MetricaError;
use crate::observability::metrics::record_collection_error;
use crate::source::MetricSource;
use crate::store::MetricStore;
use crate::types::check_gauge;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Gauge set to a fresh random value in `[0, 1)` every poll.
pub const LIVENESS_GAUGE: &str = "RandomValue";

/// Counter incremented by one every poll.
pub const LIVENESS_COUNTER: &str = "PollCount";

/// Samples registered sources into the store.
#[derive(Default)]
pub struct CollectionScheduler {
    sources: Vec<Arc<dyn MetricSource>>,
}

impl CollectionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: Arc<dyn MetricSource>) {
        info!(source = source.name(), "Registered metric source");
        self.sources.push(source);
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Spawn one loop per source plus the liveness loop.
    ///
    /// Each source's metric list is fetched once here; a source that cannot
    /// list its metrics is reported on `errors` and skipped.
    pub async fn start(
        &self,
        store: Arc<dyn MetricStore>,
        poll_interval: Duration,
        errors: mpsc::Sender<MetricaError>,
        shutdown: broadcast::Receiver<()>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.sources.len() + 1);

        for source in &self.sources {
            let names = match source.observable_metrics() {
                Ok(names) => names,
                Err(e) => {
                    warn!(source = source.name(), error = %e, "Cannot list source metrics");
                    let _ = errors.send(e).await;
                    continue;
                }
            };
            debug!(source = source.name(), metrics = names.len(), "Starting source loop");
            handles.push(tokio::spawn(poll_source(
                source.clone(),
                names,
                store.clone(),
                poll_interval,
                errors.clone(),
                shutdown.resubscribe(),
            )));
        }

        handles.push(tokio::spawn(poll_liveness(store, poll_interval, errors, shutdown)));
        handles
    }
}

async fn poll_source(
    source: Arc<dyn MetricSource>,
    names: Vec<String>,
    store: Arc<dyn MetricStore>,
    poll_interval: Duration,
    errors: mpsc::Sender<MetricaError>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = super::ticker(poll_interval);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {}
        }

        for name in &names {
            let result = match source.read(name).and_then(check_gauge) {
                Ok(value) => store.update_gauge(name, value).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                record_collection_error(source.name());
                debug!(source = source.name(), metric = %name, error = %e, "Collection failed");
                let _ = errors.send(e).await;
            }
        }
    }
    debug!(source = source.name(), "Source loop stopped");
}

async fn poll_liveness(
    store: Arc<dyn MetricStore>,
    poll_interval: Duration,
    errors: mpsc::Sender<MetricaError>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = super::ticker(poll_interval);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {}
        }

        let results = [
            store.update_gauge(LIVENESS_GAUGE, rand::random::<f64>()).await,
            store.update_counter(LIVENESS_COUNTER, 1).await,
        ];
        for result in results {
            if let Err(e) = result {
                record_collection_error("liveness");
                let _ = errors.send(e).await;
            }
        }
    }
    debug!("Liveness loop stopped");
}
