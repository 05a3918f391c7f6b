use anyhow::{Context, Result};
use clap::Parser;
use metrica_core::config::{load_file, AgentConfig, AgentSettings};
use metrica_core::delivery::spawn_workers;
use metrica_core::shutdown::{drain, shutdown_signal, GRACE_PERIOD};
use metrica_core::source::{ProcessSource, SystemSource};
use metrica_core::{
    init_observability, CollectionScheduler, DeliveryClient, MemoryStore, MetricStore,
    MetricaError, ReportScheduler,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// Capacity of the error channel; senders wait when it is full.
const ERROR_BUFFER: usize = 256;

#[derive(Parser)]
#[command(name = "metrica-agent")]
#[command(about = "Samples host metrics and reports them to a metrica server", long_about = None, version)]
struct Cli {
    /// Server address (host:port or URL)
    #[arg(short = 'a', long, env = "ADDRESS")]
    address: Option<String>,

    /// Seconds between reports
    #[arg(short = 'r', long, env = "REPORT_INTERVAL")]
    report_interval: Option<u64>,

    /// Seconds between polls
    #[arg(short = 'p', long, env = "POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Key for request signatures
    #[arg(short = 'k', long, env = "KEY", hide_env_values = true)]
    key: Option<String>,

    /// Number of concurrent delivery workers
    #[arg(short = 'l', long = "rate-limit", env = "RATE_LIMIT")]
    worker_count: Option<usize>,

    /// JSON config file
    #[arg(short = 'c', long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Send request bodies uncompressed
    #[arg(long)]
    no_gzip: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    /// Flags and env over the config file over defaults.
    fn resolve(&self) -> Result<AgentConfig> {
        let flags = AgentSettings {
            address: self.address.clone(),
            report_interval: self.report_interval,
            poll_interval: self.poll_interval,
            key: self.key.clone(),
            worker_count: self.worker_count,
        };
        let file = match &self.config {
            Some(path) => load_file(path)?,
            None => AgentSettings::default(),
        };
        Ok(flags.merge(file).resolve()?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_observability(&cli.log_level)?;

    let config = cli.resolve().context("invalid configuration")?;
    info!(
        address = %config.address,
        report_interval_secs = config.report_interval.as_secs(),
        poll_interval_secs = config.poll_interval.as_secs(),
        workers = config.worker_count,
        signed = config.key.is_some(),
        "metrica agent starting"
    );

    let shutdown = shutdown_signal();
    let mut stop = shutdown.subscribe();
    run(config, !cli.no_gzip, &shutdown, async move {
        let _ = stop.recv().await;
    })
    .await?;

    info!("metrica agent stopped");
    Ok(())
}

/// Wire sources, schedulers and workers; return after `stopped` resolves
/// and the loops have drained.
async fn run(
    config: AgentConfig,
    compress: bool,
    shutdown: &broadcast::Sender<()>,
    stopped: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());

    let mut collection = CollectionScheduler::new();
    collection.register(Arc::new(SystemSource::new()));
    match ProcessSource::new() {
        Ok(source) => collection.register(Arc::new(source)),
        Err(e) => warn!(error = %e, "Process metrics unavailable"),
    }

    let client = Arc::new(DeliveryClient::new(&config.address, config.key.clone(), compress)?);
    let (errors_tx, errors_rx) = mpsc::channel(ERROR_BUFFER);
    let (jobs_tx, jobs_rx) = mpsc::channel(config.worker_count);

    let error_log = tokio::spawn(log_errors(errors_rx));

    let mut tasks = collection
        .start(store.clone(), config.poll_interval, errors_tx.clone(), shutdown.subscribe())
        .await;
    tasks.push(tokio::spawn(ReportScheduler::run(
        store,
        config.report_interval,
        jobs_tx,
        errors_tx.clone(),
        shutdown.subscribe(),
    )));
    tasks.extend(spawn_workers(client, config.worker_count, jobs_rx, errors_tx));
    info!(tasks = tasks.len(), "metrica agent ready");

    stopped.await;
    info!(grace_secs = GRACE_PERIOD.as_secs(), "Shutting down");
    if !drain(tasks, GRACE_PERIOD).await {
        warn!("Some deliveries were still in flight at exit");
    }
    // Every sender is gone once the tasks are; the logger drains what is left.
    let _ = error_log.await;
    Ok(())
}

async fn log_errors(mut errors: mpsc::Receiver<MetricaError>) {
    while let Some(e) = errors.recv().await {
        error!(error = %e, "Agent error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from(["metrica-agent", "-a", "127.0.0.1:9090", "-r", "5", "-l", "3"]);
        let config = cli.resolve().unwrap();
        assert_eq!(config.address, "127.0.0.1:9090");
        assert_eq!(config.report_interval.as_secs(), 5);
        assert_eq!(config.worker_count, 3);
    }
}
