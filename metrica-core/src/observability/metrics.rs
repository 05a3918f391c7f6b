//! Pipeline self-metrics.
//!
//! Names follow Prometheus conventions (`_total` for counters). These
//! describe the pipeline itself, not the metrics it carries.

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Register descriptions for every pipeline metric.
pub fn register_core_metrics() {
    // Storage
    describe_counter!(
        "metrica_store_failures_total",
        "Store operations that failed after retries (by backend, operation)"
    );
    describe_counter!("metrica_retries_total", "Retried attempts (by operation)");

    // Backup
    describe_counter!("metrica_backup_saves_total", "Backup files written");
    describe_counter!("metrica_backup_failures_total", "Backup file writes that failed");

    // Agent
    describe_counter!(
        "metrica_collection_errors_total",
        "Failed source reads or store writes during collection (by source)"
    );
    describe_counter!(
        "metrica_delivery_attempts_total",
        "Delivery POST attempts (by outcome: success, retry)"
    );
    describe_counter!("metrica_delivery_failures_total", "Batches dropped after every attempt failed");
    describe_histogram!("metrica_delivery_batch_size", "Metrics per delivered batch");

    // Server
    describe_counter!(
        "metrica_http_requests_total",
        "HTTP requests handled (by route, status)"
    );
}

pub fn record_delivery_attempt(outcome: &'static str) {
    counter!("metrica_delivery_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_delivery_failure() {
    counter!("metrica_delivery_failures_total").increment(1);
}

pub fn record_batch_size(size: usize) {
    histogram!("metrica_delivery_batch_size").record(size as f64);
}

pub fn record_collection_error(source: &str) {
    counter!("metrica_collection_errors_total", "source" => source.to_string()).increment(1);
}

pub fn record_http_request(route: &str, status: u16) {
    counter!(
        "metrica_http_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
