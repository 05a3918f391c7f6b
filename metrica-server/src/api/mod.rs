//! HTTP API of the collector server.
//!
//! Text routes take the metric in the path; JSON routes take wire records.
//! Request bodies may be gzip-compressed and signed; see [`middleware`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use metrica_core::{BackupManager, HealthChecker, MetricStore, MetricaError};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

mod handlers;
pub mod middleware;

/// Health subsystem names.
pub const STORE_SUBSYSTEM: &str = "store";
pub const BACKUP_SUBSYSTEM: &str = "backup";

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn MetricStore>,
    pub backup: Arc<BackupManager>,
    /// Signing key; request checks and response signatures are off when `None`.
    pub signing_key: Option<Arc<str>>,
    pub health: HealthChecker,
}

impl ApiState {
    pub fn new(
        store: Arc<dyn MetricStore>,
        backup: Arc<BackupManager>,
        signing_key: Option<String>,
        health: HealthChecker,
    ) -> Self {
        Self { store, backup, signing_key: signing_key.map(Arc::from), health }
    }
}

/// Build the full router with middleware.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(handlers::home).post(handlers::undefined_type))
        .route("/ping", get(handlers::ping))
        .route("/health", get(handlers::health))
        .route("/update/", post(handlers::update_json))
        .route("/update/{kind}/{name}/{value}", post(handlers::update_text))
        .route("/updates/", post(handlers::update_batch))
        .route("/value/", post(handlers::value_json))
        .route("/value/{kind}/{name}", get(handlers::value_text))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::signatures))
        .layer(axum::middleware::from_fn(middleware::decompress_request))
        .layer(axum::middleware::from_fn(middleware::track_requests))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error type returned by handlers.
#[derive(Debug)]
pub struct ApiError(pub MetricaError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            MetricaError::NotFound { .. } => StatusCode::NOT_FOUND,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MetricaError> for ApiError {
    fn from(err: MetricaError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        } else {
            debug!(error = %self.0, status = status.as_u16(), "Request rejected");
        }
        (status, self.0.to_string()).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
