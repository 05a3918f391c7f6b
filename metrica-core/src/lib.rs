//! metrica core library
//!
//! Metric model, storage backends, backup, delivery and the agent's
//! schedulers, shared by the `metrica-server` and `metrica-agent` binaries.

pub mod backup;
pub mod config;
pub mod delivery;
pub mod error;
pub mod observability;
pub mod retry;
pub mod scheduler;
pub mod shutdown;
pub mod source;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use backup::BackupManager;
pub use delivery::{DeliveryClient, DeliveryJob};
pub use error::{MetricaError, Result};
pub use observability::{health::HealthChecker, init as init_observability};
pub use scheduler::{CollectionScheduler, ReportScheduler};
pub use source::MetricSource;
pub use store::{MemoryStore, MetricStore, PostgresStore};
pub use types::{Metric, MetricKind, MetricsSnapshot};
