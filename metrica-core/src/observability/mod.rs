//! Observability infrastructure: tracing, metrics, health checks.
//!
//! Both binaries call [`init`] once at startup. The Prometheus exporter is
//! optional and only installed when an address is given.

use crate::error::{MetricaError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod health;
pub mod metrics;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_level` when set. Fails if a subscriber is
/// already installed.
pub fn init(default_level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .try_init()
        .map_err(|e| MetricaError::Internal(format!("tracing already initialized: {}", e)))?;

    metrics::register_core_metrics();
    Ok(())
}

/// Serve pipeline metrics in Prometheus format on `addr`.
pub fn install_prometheus(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricaError::Internal(format!("prometheus exporter: {}", e)))?;
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}
