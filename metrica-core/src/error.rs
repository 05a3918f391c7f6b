//! Error types for metrica.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use crate::types::MetricKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for metrica operations.
pub type Result<T> = std::result::Result<T, MetricaError>;

/// Main error type for metrica.
#[derive(Error, Debug)]
pub enum MetricaError {
    // Metric value errors
    #[error("Cannot parse {kind} value: {value:?}")]
    Parse { kind: MetricKind, value: String },

    #[error("Unknown metric type: {0}")]
    UnknownMetricKind(String),

    #[error("Metric not found: {kind}/{name}")]
    NotFound { kind: MetricKind, name: String },

    #[error("Metric {name} is missing its {kind} value")]
    MissingValue { kind: MetricKind, name: String },

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    // Source errors
    #[error("Source {source_name} does not provide metric {name}")]
    UnknownMetric { source_name: String, name: String },

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database rejected the operation: {0}")]
    DatabaseRejected(String),

    #[error("Storage unavailable after {attempts} attempts ({operation}): {reason}")]
    StorageUnavailable { operation: String, attempts: u32, reason: String },

    // Delivery errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Delivery failed after {attempts} attempts: {reason}")]
    DeliveryFailed { attempts: u32, reason: String },

    // Request framing errors
    #[error("Request signature mismatch")]
    SignatureMismatch,

    #[error("Failed to decompress request body: {0}")]
    Decompression(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MetricaError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }

    /// Whether a bounded local retry may clear this error.
    ///
    /// Malformed input and absent metrics are final; backend and network
    /// failures are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Transport(_) | Self::Io { .. })
    }

    /// Whether this error was caused by the caller's input (a 4xx outcome).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. }
                | Self::UnknownMetricKind(_)
                | Self::MissingValue { .. }
                | Self::OutOfRange(_)
                | Self::SignatureMismatch
                | Self::Decompression(_)
                | Self::InvalidRequest(_)
        )
    }
}

impl From<sqlx::Error> for MetricaError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // 22003: numeric_value_out_of_range
                Some("22003") => Self::OutOfRange(db.message().to_string()),
                Some(code) if is_transient_sqlstate(code) => Self::Database(err.to_string()),
                _ => Self::DatabaseRejected(err.to_string()),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Database(err.to_string()),
            _ => Self::DatabaseRejected(err.to_string()),
        }
    }
}

/// SQLSTATE classes a retry can clear: connection exceptions (08),
/// transaction rollbacks such as serialization failures (40), insufficient
/// resources (53) and operator intervention like an admin shutdown (57P).
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code.starts_with("40") || code.starts_with("53") || code.starts_with("57P")
}
