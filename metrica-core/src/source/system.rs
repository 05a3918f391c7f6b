//! Host-wide memory and per-CPU utilization.

use super::{poisoned, unknown_metric, MetricSource};
use crate::error::Result;
use std::sync::Mutex;
use sysinfo::System;

const TOTAL_MEMORY: &str = "TotalMemory";
const FREE_MEMORY: &str = "FreeMemory";
const CPU_PREFIX: &str = "CPUutilization";

/// Host memory and CPU gauges.
///
/// Serves `TotalMemory`, `FreeMemory` (bytes) and `CPUutilization{N}`
/// (percent, one per logical CPU, numbered from 1). CPU usage is measured
/// between consecutive reads of the same CPU.
pub struct SystemSource {
    system: Mutex<System>,
    cpu_count: usize,
}

impl SystemSource {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        let cpu_count = system.cpus().len();
        Self { system: Mutex::new(system), cpu_count }
    }

    /// 0-based CPU index for a `CPUutilization{N}` name.
    fn cpu_index(&self, name: &str) -> Option<usize> {
        let n: usize = name.strip_prefix(CPU_PREFIX)?.parse().ok()?;
        (1..=self.cpu_count).contains(&n).then(|| n - 1)
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for SystemSource {
    fn name(&self) -> &str {
        "system"
    }

    fn observable_metrics(&self) -> Result<Vec<String>> {
        let mut names = vec![TOTAL_MEMORY.to_string(), FREE_MEMORY.to_string()];
        names.extend((1..=self.cpu_count).map(|n| format!("{}{}", CPU_PREFIX, n)));
        Ok(names)
    }

    fn read(&self, name: &str) -> Result<f64> {
        let mut system = self.system.lock().map_err(|_| poisoned("system"))?;
        match name {
            TOTAL_MEMORY => {
                system.refresh_memory();
                Ok(system.total_memory() as f64)
            }
            FREE_MEMORY => {
                system.refresh_memory();
                Ok(system.free_memory() as f64)
            }
            _ => {
                let index = self.cpu_index(name).ok_or_else(|| unknown_metric(self, name))?;
                system.refresh_cpu_usage();
                let usage = system.cpus().get(index).map(|cpu| cpu.cpu_usage());
                usage.map(f64::from).ok_or_else(|| unknown_metric(self, name))
            }
        }
    }
}
