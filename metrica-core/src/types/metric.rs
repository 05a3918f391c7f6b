//! Metric domain types.

use crate::error::{MetricaError, Result};
use serde::{Deserialize, Serialize};

/// Kind of a metric.
///
/// Gauges and counters live in disjoint collections: the same name may
/// exist once as each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Last-write-wins value.
    Gauge,

    /// Running sum of reported deltas.
    Counter,
}

impl MetricKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = MetricaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gauge" => Ok(Self::Gauge),
            "counter" => Ok(Self::Counter),
            other => Err(MetricaError::UnknownMetricKind(other.to_string())),
        }
    }
}

/// Wire record for a single metric.
///
/// Exactly one of `delta` (counter) or `value` (gauge) is set. Field order
/// is part of the format: `id`, `type`, then `delta` or `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name.
    pub id: String,

    /// Metric kind, serialized as `type`.
    #[serde(rename = "type")]
    pub kind: MetricKind,

    /// Counter delta (or accumulated total in responses).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,

    /// Gauge value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self { id: id.into(), kind: MetricKind::Gauge, delta: None, value: Some(value) }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self { id: id.into(), kind: MetricKind::Counter, delta: Some(delta), value: None }
    }

    /// Build a record from a formatted value string.
    pub fn parse(kind: MetricKind, id: impl Into<String>, value: &str) -> Result<Self> {
        let id = id.into();
        match kind {
            MetricKind::Gauge => Ok(Self::gauge(id, parse_gauge(value)?)),
            MetricKind::Counter => Ok(Self::counter(id, parse_counter(value)?)),
        }
    }

    /// Formatted value for the record's kind.
    ///
    /// Fails with `MissingValue` when the field matching `kind` is absent.
    pub fn formatted_value(&self) -> Result<String> {
        match self.kind {
            MetricKind::Gauge => self.value.map(format_gauge),
            MetricKind::Counter => self.delta.map(format_counter),
        }
        .ok_or_else(|| MetricaError::MissingValue { kind: self.kind, name: self.id.clone() })
    }
}

/// Full read of a store: `(name, formatted value)` pairs per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub gauges: Vec<(String, String)>,
    pub counters: Vec<(String, String)>,
}

impl MetricsSnapshot {
    /// Total number of entries across both kinds.
    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    /// Iterate every entry tagged with its kind, gauges first.
    pub fn iter(&self) -> impl Iterator<Item = (MetricKind, &str, &str)> {
        let gauges = self.gauges.iter().map(|(n, v)| (MetricKind::Gauge, n.as_str(), v.as_str()));
        let counters =
            self.counters.iter().map(|(n, v)| (MetricKind::Counter, n.as_str(), v.as_str()));
        gauges.chain(counters)
    }

    /// Convert to wire records, gauges first.
    pub fn to_metrics(&self) -> Result<Vec<Metric>> {
        self.iter().map(|(kind, name, value)| Metric::parse(kind, name, value)).collect()
    }
}

/// Format a gauge with the minimal number of decimal digits, no exponent.
pub fn format_gauge(value: f64) -> String {
    // f64 Display is the shortest round-tripping decimal and never uses an exponent.
    value.to_string()
}

/// Format a counter as a base-10 integer.
pub fn format_counter(value: i64) -> String {
    value.to_string()
}

/// Parse a gauge; NaN and infinities are rejected since JSON cannot carry them.
pub fn parse_gauge(value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| MetricaError::Parse { kind: MetricKind::Gauge, value: value.to_string() })
}

/// Reject gauge readings that would serialize as `null`.
pub fn check_gauge(value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MetricaError::Parse { kind: MetricKind::Gauge, value: value.to_string() })
    }
}

pub fn parse_counter(value: &str) -> Result<i64> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| MetricaError::Parse { kind: MetricKind::Counter, value: value.to_string() })
}
