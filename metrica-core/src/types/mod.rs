//! Core domain types for metrica.

pub mod metric;

// Re-exports
pub use metric::{
    check_gauge, format_counter, format_gauge, parse_counter, parse_gauge, Metric, MetricKind,
    MetricsSnapshot,
};
