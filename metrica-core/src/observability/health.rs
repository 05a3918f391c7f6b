//! Subsystem health tracking.
//!
//! The server registers `store` and `backup`; `/ping` and write failures
//! update them, and `GET /health` reports the aggregate.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Overall or per-subsystem health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Aggregate health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub version: String,
    pub subsystems: Vec<SubsystemHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
}

/// Shared registry of subsystem health.
#[derive(Clone, Default)]
pub struct HealthChecker {
    subsystems: Arc<RwLock<Vec<SubsystemHealth>>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `name` as healthy. Registering twice is a no-op.
    pub async fn register(&self, name: &str) {
        let mut subsystems = self.subsystems.write().await;
        if subsystems.iter().all(|s| s.name != name) {
            subsystems.push(SubsystemHealth {
                name: name.to_string(),
                status: HealthStatus::Healthy,
                message: None,
            });
        }
    }

    /// Set the status of a registered subsystem; unknown names are ignored.
    pub async fn update(&self, name: &str, status: HealthStatus, message: Option<String>) {
        let mut subsystems = self.subsystems.write().await;
        if let Some(subsystem) = subsystems.iter_mut().find(|s| s.name == name) {
            subsystem.status = status;
            subsystem.message = message;
        }
    }

    /// Mark `name` healthy on `Ok`, unhealthy with the error text otherwise.
    pub async fn observe<T, E: std::fmt::Display>(&self, name: &str, result: &Result<T, E>) {
        match result {
            Ok(_) => self.update(name, HealthStatus::Healthy, None).await,
            Err(e) => self.update(name, HealthStatus::Unhealthy, Some(e.to_string())).await,
        }
    }

    /// Worst status across subsystems.
    pub async fn report(&self) -> HealthCheck {
        let subsystems = self.subsystems.read().await.clone();

        let status = if subsystems.iter().any(|s| s.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if subsystems.iter().any(|s| s.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthCheck { status, version: env!("CARGO_PKG_VERSION").to_string(), subsystems }
    }
}
