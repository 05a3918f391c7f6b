//! Metric sources sampled by the agent.
//!
//! A source names the gauges it can produce once, then is asked for each
//! value on every poll tick. Reads are synchronous and cheap; the
//! collection loop awaits the store write, not the read.

use crate::error::{MetricaError, Result};

mod process;
mod system;

pub use process::ProcessSource;
pub use system::SystemSource;

/// A producer of gauge readings.
pub trait MetricSource: Send + Sync {
    /// Source name (for logging/metrics).
    fn name(&self) -> &str;

    /// Every metric name this source can read.
    fn observable_metrics(&self) -> Result<Vec<String>>;

    /// Current value of `name`; `UnknownMetric` for names not served.
    fn read(&self, name: &str) -> Result<f64>;
}

pub(crate) fn unknown_metric(source: &dyn MetricSource, name: &str) -> MetricaError {
    MetricaError::UnknownMetric { source_name: source.name().to_string(), name: name.to_string() }
}

pub(crate) fn poisoned(source: &str) -> MetricaError {
    MetricaError::Internal(format!("{} source lock poisoned", source))
}
