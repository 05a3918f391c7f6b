//! Metrics of the agent process itself.

use super::{poisoned, unknown_metric, MetricSource};
use crate::error::{MetricaError, Result};
use std::sync::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};

const METRICS: [&str; 6] = ["Alloc", "Sys", "CPUPercent", "DiskRead", "DiskWritten", "RunTime"];

/// Gauges for the current process: resident and virtual memory (bytes),
/// CPU percent, cumulative disk bytes read/written and uptime (seconds).
pub struct ProcessSource {
    pid: Pid,
    system: Mutex<System>,
}

impl ProcessSource {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| MetricaError::Internal(format!("cannot resolve own pid: {}", e)))?;
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        Ok(Self { pid, system: Mutex::new(system) })
    }
}

impl MetricSource for ProcessSource {
    fn name(&self) -> &str {
        "process"
    }

    fn observable_metrics(&self) -> Result<Vec<String>> {
        Ok(METRICS.iter().map(|m| m.to_string()).collect())
    }

    fn read(&self, name: &str) -> Result<f64> {
        if !METRICS.contains(&name) {
            return Err(unknown_metric(self, name));
        }

        let mut system = self.system.lock().map_err(|_| poisoned("process"))?;
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        let process = system
            .process(self.pid)
            .ok_or_else(|| MetricaError::Internal(format!("process {} not found", self.pid)))?;

        let value = match name {
            "Alloc" => process.memory() as f64,
            "Sys" => process.virtual_memory() as f64,
            "CPUPercent" => f64::from(process.cpu_usage()),
            "DiskRead" => process.disk_usage().total_read_bytes as f64,
            "DiskWritten" => process.disk_usage().total_written_bytes as f64,
            _ => process.run_time() as f64,
        };
        Ok(value)
    }
}
