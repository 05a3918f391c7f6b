//! Configuration for the server and the agent.
//!
//! Each binary builds a partial config from its flags (clap fills in env
//! fallbacks), loads another from the optional JSON file, and merges them:
//! flag > env > file > default.

use crate::error::{MetricaError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "localhost:8080";
pub const DEFAULT_STORE_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_STORE_FILE: &str = "/tmp/metrics-db.json";
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_WORKER_COUNT: usize = 1;

/// Read a partial config from a JSON file.
pub fn load_file<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| MetricaError::InvalidConfig {
        reason: format!("Failed to read config {}: {}", path.display(), e),
    })?;
    serde_json::from_str(&content).map_err(|e| MetricaError::InvalidConfig {
        reason: format!("Failed to parse config {}: {}", path.display(), e),
    })
}

/// Server settings from one source; `None` means "not set here".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub address: Option<String>,
    /// Seconds; 0 selects sync backup.
    pub store_interval: Option<u64>,
    pub store_file: Option<PathBuf>,
    pub restore: Option<bool>,
    pub database_dsn: Option<String>,
    pub key: Option<String>,
}

impl ServerSettings {
    /// Fill every unset field from `lower`.
    pub fn merge(self, lower: ServerSettings) -> Self {
        Self {
            address: self.address.or(lower.address),
            store_interval: self.store_interval.or(lower.store_interval),
            store_file: self.store_file.or(lower.store_file),
            restore: self.restore.or(lower.restore),
            database_dsn: self.database_dsn.or(lower.database_dsn),
            key: self.key.or(lower.key),
        }
    }

    /// Apply defaults and validate.
    pub fn resolve(self) -> Result<ServerConfig> {
        let address = self.address.unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
        if address.trim().is_empty() {
            return Err(MetricaError::InvalidConfig { reason: "address must not be empty".into() });
        }

        Ok(ServerConfig {
            address,
            store_interval: Duration::from_secs(
                self.store_interval.unwrap_or(DEFAULT_STORE_INTERVAL_SECS),
            ),
            store_file: self.store_file.unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE)),
            restore: self.restore.unwrap_or(true),
            database_dsn: self.database_dsn.filter(|d| !d.is_empty()),
            key: self.key.filter(|k| !k.is_empty()),
        })
    }
}

/// Effective server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub address: String,
    pub store_interval: Duration,
    pub store_file: PathBuf,
    pub restore: bool,
    /// Postgres DSN; the memory store is used when absent.
    pub database_dsn: Option<String>,
    /// Signing key for request checks and response signatures.
    pub key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            store_interval: Duration::from_secs(DEFAULT_STORE_INTERVAL_SECS),
            store_file: PathBuf::from(DEFAULT_STORE_FILE),
            restore: true,
            database_dsn: None,
            key: None,
        }
    }
}

/// Agent settings from one source; `None` means "not set here".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub address: Option<String>,
    pub report_interval: Option<u64>,
    pub poll_interval: Option<u64>,
    pub key: Option<String>,
    pub worker_count: Option<usize>,
}

impl AgentSettings {
    pub fn merge(self, lower: AgentSettings) -> Self {
        Self {
            address: self.address.or(lower.address),
            report_interval: self.report_interval.or(lower.report_interval),
            poll_interval: self.poll_interval.or(lower.poll_interval),
            key: self.key.or(lower.key),
            worker_count: self.worker_count.or(lower.worker_count),
        }
    }

    /// Apply defaults and validate; intervals and worker count must be positive.
    pub fn resolve(self) -> Result<AgentConfig> {
        let report = self.report_interval.unwrap_or(DEFAULT_REPORT_INTERVAL_SECS);
        let poll = self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        let workers = self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT);

        if report == 0 || poll == 0 {
            return Err(MetricaError::InvalidConfig {
                reason: "report and poll intervals must be at least 1 second".into(),
            });
        }
        if workers == 0 {
            return Err(MetricaError::InvalidConfig {
                reason: "worker count must be at least 1".into(),
            });
        }

        Ok(AgentConfig {
            address: self.address.unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
            report_interval: Duration::from_secs(report),
            poll_interval: Duration::from_secs(poll),
            key: self.key.filter(|k| !k.is_empty()),
            worker_count: workers,
        })
    }
}

/// Effective agent configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub address: String,
    pub report_interval: Duration,
    pub poll_interval: Duration,
    pub key: Option<String>,
    pub worker_count: usize,
}
