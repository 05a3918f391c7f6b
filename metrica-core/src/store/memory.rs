//! Volatile in-process metric store.

use super::{parse_batch, MetricStore};
use crate::error::{MetricaError, Result};
use crate::types::{check_gauge, format_counter, format_gauge, MetricKind, MetricsSnapshot};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

#[derive(Debug, Default)]
struct MemoryState {
    gauges: BTreeMap<String, f64>,
    counters: BTreeMap<String, i64>,
}

impl MemoryState {
    fn counter_sum(&self, name: &str, current: Option<i64>, delta: i64) -> Result<i64> {
        current
            .or_else(|| self.counters.get(name).copied())
            .unwrap_or(0)
            .checked_add(delta)
            .ok_or_else(|| MetricaError::OutOfRange(format!("counter {} overflows i64", name)))
    }

    /// New totals for a batch of increments, without applying any of them.
    fn stage_counters(&self, counters: Vec<(String, i64)>) -> Result<BTreeMap<String, i64>> {
        let mut staged = BTreeMap::new();
        for (name, delta) in counters {
            let total = self.counter_sum(&name, staged.get(&name).copied(), delta)?;
            staged.insert(name, total);
        }
        Ok(staged)
    }
}

/// In-memory metric store.
///
/// One lock guards both collections, so a counter read-modify-write is a
/// single critical section and a batch is applied atomically.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn update_gauge(&self, name: &str, value: f64) -> Result<()> {
        let value = check_gauge(value)?;
        let mut state = self.state.write().await;
        state.gauges.insert(name.to_string(), value);
        Ok(())
    }

    async fn update_counter(&self, name: &str, delta: i64) -> Result<()> {
        let mut state = self.state.write().await;
        let total = state.counter_sum(name, None, delta)?;
        state.counters.insert(name.to_string(), total);
        Ok(())
    }

    #[instrument(skip_all, fields(gauges = gauges.len(), counters = counters.len()))]
    async fn update_batch(
        &self,
        gauges: &[(String, String)],
        counters: &[(String, String)],
    ) -> Result<()> {
        let (gauges, counters) = parse_batch(gauges, counters)?;

        let mut state = self.state.write().await;
        // Overflow rejects the whole batch before anything is written.
        let totals = state.stage_counters(counters)?;
        state.gauges.extend(gauges);
        state.counters.extend(totals);
        debug!("Batch applied");
        Ok(())
    }

    async fn get_metric(&self, kind: MetricKind, name: &str) -> Result<String> {
        let state = self.state.read().await;
        let value = match kind {
            MetricKind::Gauge => state.gauges.get(name).copied().map(format_gauge),
            MetricKind::Counter => state.counters.get(name).copied().map(format_counter),
        };
        value.ok_or_else(|| MetricaError::NotFound { kind, name: name.to_string() })
    }

    async fn get_all_metrics(&self) -> Result<MetricsSnapshot> {
        let state = self.state.read().await;
        Ok(MetricsSnapshot {
            gauges: state.gauges.iter().map(|(n, v)| (n.clone(), format_gauge(*v))).collect(),
            counters: state.counters.iter().map(|(n, v)| (n.clone(), format_counter(*v))).collect(),
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}
