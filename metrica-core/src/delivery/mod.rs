//! Delivery of metric batches from the agent to the server.
//!
//! A batch is one JSON array of metric records POSTed to `{base}/updates/`.
//! Each POST is retried on the fixed backoff schedule; a batch that fails
//! every attempt is reported once on the error channel and dropped.

use crate::error::{MetricaError, Result};
use crate::observability::metrics::{
    record_batch_size, record_delivery_attempt, record_delivery_failure,
};
use crate::retry::{retry_with_backoff, MAX_ATTEMPTS};
use crate::types::MetricsSnapshot;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

pub mod codec;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One report tick's worth of metrics.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub snapshot: MetricsSnapshot,
}

/// Job channel receiver shared by every worker.
pub type JobReceiver = Arc<Mutex<mpsc::Receiver<DeliveryJob>>>;

/// Encoded request body plus its headers.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub body: Vec<u8>,
    pub gzipped: bool,
    pub signature: Option<String>,
}

/// HTTP client for the server's batch endpoint.
pub struct DeliveryClient {
    http: reqwest::Client,
    endpoint: String,
    signing_key: Option<String>,
    compress: bool,
}

impl DeliveryClient {
    /// `base_url` gains an `http://` prefix when it has no scheme.
    pub fn new(base_url: &str, signing_key: Option<String>, compress: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MetricaError::Transport(format!("failed to build HTTP client: {}", e)))?;

        let base = base_url.trim_end_matches('/');
        let endpoint = if base.starts_with("http://") || base.starts_with("https://") {
            format!("{}/updates/", base)
        } else {
            format!("http://{}/updates/", base)
        };

        let signing_key = signing_key.filter(|k| !k.is_empty());
        Ok(Self { http, endpoint, signing_key, compress })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Serialize, sign and (optionally) compress a snapshot.
    ///
    /// The signature covers the uncompressed JSON.
    pub fn encode(&self, snapshot: &MetricsSnapshot) -> Result<EncodedBatch> {
        let records = snapshot.to_metrics()?;
        let json =
            serde_json::to_vec(&records).map_err(|e| MetricaError::Serialization(e.to_string()))?;

        let signature = self.signing_key.as_deref().map(|key| codec::sign(&json, key));
        let (body, gzipped) =
            if self.compress { (codec::gzip(&json)?, true) } else { (json, false) };
        Ok(EncodedBatch { body, gzipped, signature })
    }

    /// Deliver one snapshot, retrying on transport errors and non-2xx replies.
    ///
    /// Empty snapshots are not sent. Returns `DeliveryFailed` once every
    /// attempt has failed.
    #[instrument(skip_all, fields(endpoint = %self.endpoint, metrics = snapshot.len()))]
    pub async fn send(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        if snapshot.is_empty() {
            debug!("Nothing to deliver");
            return Ok(());
        }

        let batch = self.encode(snapshot)?;
        record_batch_size(snapshot.len());
        let batch = &batch;

        let result = retry_with_backoff("deliver", move |attempt| async move {
            let outcome = self.post(batch).await;
            match &outcome {
                Ok(()) => record_delivery_attempt("success"),
                Err(e) => {
                    record_delivery_attempt("retry");
                    debug!(attempt, error = %e, "Delivery attempt failed");
                }
            }
            outcome
        })
        .await;

        match result {
            Ok(()) => {
                debug!("Batch delivered");
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                record_delivery_failure();
                Err(MetricaError::DeliveryFailed { attempts: MAX_ATTEMPTS, reason: e.to_string() })
            }
            Err(e) => Err(e),
        }
    }

    async fn post(&self, batch: &EncodedBatch) -> Result<()> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(batch.body.clone());
        if batch.gzipped {
            request = request.header(CONTENT_ENCODING, "gzip");
        }
        if let Some(signature) = &batch.signature {
            request = request.header(codec::HASH_HEADER, signature);
        }

        let response = request.send().await.map_err(|e| MetricaError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(MetricaError::Transport(format!("server responded with {}", status)))
        }
    }
}

/// Drain jobs until the channel closes, forwarding failures to `errors`.
pub async fn worker(
    id: usize,
    client: Arc<DeliveryClient>,
    jobs: JobReceiver,
    errors: mpsc::Sender<MetricaError>,
) {
    debug!(worker = id, "Delivery worker started");
    loop {
        // Only the receive holds the lock; sends run concurrently.
        let job = jobs.lock().await.recv().await;
        let Some(job) = job else { break };

        if let Err(e) = client.send(&job.snapshot).await {
            warn!(worker = id, error = %e, "Batch dropped");
            if errors.send(e).await.is_err() {
                error!(worker = id, "Error channel closed");
            }
        }
    }
    debug!(worker = id, "Delivery worker stopped");
}

/// Start `count` workers (at least one) on a shared job channel.
pub fn spawn_workers(
    client: Arc<DeliveryClient>,
    count: usize,
    jobs: mpsc::Receiver<DeliveryJob>,
    errors: mpsc::Sender<MetricaError>,
) -> Vec<JoinHandle<()>> {
    let count = count.max(1);
    info!(workers = count, endpoint = %client.endpoint(), "Starting delivery workers");

    let jobs: JobReceiver = Arc::new(Mutex::new(jobs));
    (0..count)
        .map(|id| tokio::spawn(worker(id, client.clone(), jobs.clone(), errors.clone())))
        .collect()
}
