//! Metric storage.
//!
//! The `MetricStore` trait is the only way metrics are mutated or read.
//! Two interchangeable backends implement it:
//! - [`MemoryStore`]: volatile, process-local (agent, or server without a DSN)
//! - [`PostgresStore`]: durable, one `metric` table shared by both kinds
//!
//! Update semantics are fixed per kind: gauges are overwritten, counters
//! accumulate. Both backends serialize mutations so that concurrent counter
//! increments are never lost.

use crate::error::Result;
use crate::types::{parse_counter, parse_gauge, MetricKind, MetricsSnapshot};
use async_trait::async_trait;

mod memory;
mod postgres;
pub mod schema;

#[cfg(test)]
mod tests;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Metric store trait.
///
/// Implementations must be safe to share across tasks behind an `Arc`.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Replace the gauge value for `name`.
    async fn update_gauge(&self, name: &str, value: f64) -> Result<()>;

    /// Add `delta` to the counter for `name` (absent counters start at 0).
    async fn update_counter(&self, name: &str, delta: i64) -> Result<()>;

    /// Apply a batch of string-encoded updates.
    ///
    /// Every value is parsed before anything is written; a malformed entry
    /// leaves the store untouched. Gauges overwrite, counters accumulate.
    async fn update_batch(
        &self,
        gauges: &[(String, String)],
        counters: &[(String, String)],
    ) -> Result<()>;

    /// Formatted current value of a metric, or `NotFound`.
    async fn get_metric(&self, kind: MetricKind, name: &str) -> Result<String>;

    /// Every metric, formatted identically to `get_metric`, sorted by name.
    async fn get_all_metrics(&self) -> Result<MetricsSnapshot>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Backend name (for logging/metrics).
    fn name(&self) -> &str;
}

/// Parsed form of a batch: `(name, value)` per kind.
pub(crate) type ParsedBatch = (Vec<(String, f64)>, Vec<(String, i64)>);

/// Parse every value of a batch, failing on the first malformed entry.
pub(crate) fn parse_batch(
    gauges: &[(String, String)],
    counters: &[(String, String)],
) -> Result<ParsedBatch> {
    let gauges = gauges
        .iter()
        .map(|(name, value)| Ok((name.clone(), parse_gauge(value)?)))
        .collect::<Result<Vec<_>>>()?;
    let counters = counters
        .iter()
        .map(|(name, value)| Ok((name.clone(), parse_counter(value)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok((gauges, counters))
}
