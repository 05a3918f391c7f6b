use anyhow::{Context, Result};
use clap::Parser;
use metrica_core::config::{load_file, ServerConfig, ServerSettings};
use metrica_core::observability::install_prometheus;
use metrica_core::shutdown::shutdown_signal;
use metrica_core::{
    init_observability, BackupManager, HealthChecker, MemoryStore, MetricStore, PostgresStore,
};
use metrica_server::api::{self, ApiState, BACKUP_SUBSYSTEM, STORE_SUBSYSTEM};
use metrica_server::ShutdownManager;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "metrica-server")]
#[command(about = "Collector server for metrica agents", long_about = None, version)]
struct Cli {
    /// Listen address (host:port)
    #[arg(short = 'a', long, env = "ADDRESS")]
    address: Option<String>,

    /// Seconds between backups; 0 writes the backup after every update
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    store_interval: Option<u64>,

    /// Backup file path
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    store_file: Option<PathBuf>,

    /// Restore metrics from the backup file at startup
    #[arg(short = 'r', long, env = "RESTORE")]
    restore: Option<bool>,

    /// Postgres DSN; metrics are kept in memory when unset
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// Key for request and response signatures
    #[arg(short = 'k', long, env = "KEY", hide_env_values = true)]
    key: Option<String>,

    /// JSON config file
    #[arg(short = 'c', long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Serve Prometheus metrics about the server itself on this address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    /// Flags and env over the config file over defaults.
    fn resolve(&self) -> Result<ServerConfig> {
        let flags = ServerSettings {
            address: self.address.clone(),
            store_interval: self.store_interval,
            store_file: self.store_file.clone(),
            restore: self.restore,
            database_dsn: self.database_dsn.clone(),
            key: self.key.clone(),
        };
        let file = match &self.config {
            Some(path) => load_file(path)?,
            None => ServerSettings::default(),
        };
        Ok(flags.merge(file).resolve()?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize observability FIRST
    init_observability(&cli.log_level)?;
    if let Some(addr) = cli.metrics_addr {
        install_prometheus(addr)?;
    }

    let config = cli.resolve().context("invalid configuration")?;
    info!(
        address = %config.address,
        store_interval_secs = config.store_interval.as_secs(),
        store_file = %config.store_file.display(),
        restore = config.restore,
        database = config.database_dsn.is_some(),
        signed = config.key.is_some(),
        "metrica server starting"
    );

    let health = HealthChecker::new();
    health.register(STORE_SUBSYSTEM).await;
    health.register(BACKUP_SUBSYSTEM).await;

    let store: Arc<dyn MetricStore> = match &config.database_dsn {
        Some(dsn) => Arc::new(
            PostgresStore::connect(dsn).await.context("failed to initialize Postgres store")?,
        ),
        None => Arc::new(MemoryStore::new()),
    };
    info!(backend = store.name(), "Metric store ready");

    let backup =
        Arc::new(BackupManager::new(store.clone(), config.store_interval, &config.store_file));
    if config.restore {
        if let Err(e) = backup.restore().await {
            warn!(error = %e, "Restore failed, starting with current store contents");
        }
    }

    let shutdown = shutdown_signal();
    let mut tasks = Vec::new();
    if !backup.is_sync_mode() {
        tasks.push(tokio::spawn(backup.clone().run(shutdown.subscribe())));
    }

    let state = ApiState::new(store, backup.clone(), config.key.clone(), health);
    let listener = TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("failed to bind {}", config.address))?;
    info!(address = %config.address, "metrica server ready");

    let mut stop = shutdown.subscribe();
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async move {
            let _ = stop.recv().await;
        })
        .await
        .context("HTTP server failed")?;

    ShutdownManager::new(backup).shutdown(tasks).await;
    info!("metrica server stopped");
    Ok(())
}
