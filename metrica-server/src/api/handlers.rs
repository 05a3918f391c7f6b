use super::{ApiError, ApiResult, ApiState, BACKUP_SUBSYSTEM, STORE_SUBSYSTEM};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::Json;
use metrica_core::observability::health::HealthStatus;
use metrica_core::types::{parse_counter, parse_gauge};
use metrica_core::{Metric, MetricKind, MetricaError};
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use tracing::{info, warn};

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, MetricaError> {
    serde_json::from_slice(body).map_err(|e| MetricaError::InvalidRequest(e.to_string()))
}

fn text(body: String) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body)
}

/// Record a write in sync mode; failures degrade backup health but not the request.
async fn sync_backup(state: &ApiState, kind: MetricKind, name: &str) {
    if !state.backup.is_sync_mode() {
        return;
    }
    let result = state.backup.record_write(kind, name).await;
    if let Err(e) = &result {
        warn!(kind = %kind, name, error = %e, "Sync backup failed");
    }
    state.health.observe(BACKUP_SUBSYSTEM, &result).await;
}

/// Apply one record and return it with the metric's current value.
async fn apply_metric(state: &ApiState, metric: &Metric) -> Result<Metric, MetricaError> {
    let missing = || MetricaError::MissingValue { kind: metric.kind, name: metric.id.clone() };
    match metric.kind {
        MetricKind::Gauge => {
            state.store.update_gauge(&metric.id, metric.value.ok_or_else(missing)?).await?
        }
        MetricKind::Counter => {
            state.store.update_counter(&metric.id, metric.delta.ok_or_else(missing)?).await?
        }
    }
    let current = state.store.get_metric(metric.kind, &metric.id).await?;
    Metric::parse(metric.kind, metric.id.as_str(), &current)
}

/// `POST /update/{kind}/{name}/{value}`
pub(super) async fn update_text(
    State(state): State<ApiState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let kind: MetricKind = kind.parse()?;
    match kind {
        MetricKind::Gauge => state.store.update_gauge(&name, parse_gauge(&value)?).await?,
        MetricKind::Counter => state.store.update_counter(&name, parse_counter(&value)?).await?,
    }
    sync_backup(&state, kind, &name).await;
    Ok(StatusCode::OK)
}

/// `POST /update/`: one JSON record; counters answer with the new total.
pub(super) async fn update_json(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<Json<Metric>> {
    let metric: Metric = decode(&body)?;
    if metric.id.is_empty() {
        return Err(MetricaError::NotFound { kind: metric.kind, name: String::new() }.into());
    }

    let updated = apply_metric(&state, &metric).await?;
    sync_backup(&state, metric.kind, &metric.id).await;
    Ok(Json(updated))
}

/// `POST /updates/`: JSON array applied atomically.
///
/// Every record is validated before the store is touched. The request is
/// echoed back.
pub(super) async fn update_batch(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<Json<Vec<Metric>>> {
    let metrics: Vec<Metric> = decode(&body)?;

    let mut gauges = Vec::new();
    let mut counters = Vec::new();
    for metric in &metrics {
        if metric.id.is_empty() {
            return Err(MetricaError::InvalidRequest("metric id must not be empty".into()).into());
        }
        let value = metric.formatted_value()?;
        match metric.kind {
            MetricKind::Gauge => gauges.push((metric.id.clone(), value)),
            MetricKind::Counter => counters.push((metric.id.clone(), value)),
        }
    }

    state.store.update_batch(&gauges, &counters).await?;

    let written: BTreeSet<(MetricKind, &str)> =
        metrics.iter().map(|m| (m.kind, m.id.as_str())).collect();
    for (kind, name) in written {
        sync_backup(&state, kind, name).await;
    }
    Ok(Json(metrics))
}

/// `GET /value/{kind}/{name}`
pub(super) async fn value_text(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let kind: MetricKind = kind.parse()?;
    let value = state.store.get_metric(kind, &name).await?;
    Ok(text(value))
}

/// `POST /value/`: `{id, type}` in, the full record out.
pub(super) async fn value_json(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<Json<Metric>> {
    let request: Metric = decode(&body)?;
    let value = state.store.get_metric(request.kind, &request.id).await?;
    Ok(Json(Metric::parse(request.kind, request.id, &value)?))
}

/// `GET /`: every metric as an HTML list.
pub(super) async fn home(State(state): State<ApiState>) -> ApiResult<Html<String>> {
    let all = state.store.get_all_metrics().await?;

    let mut body =
        String::from("<!DOCTYPE html><html><head><title>Metrics</title></head><body><h1>Metrics</h1><ul>");
    for (_, name, value) in all.iter() {
        body.push_str(&format!("<li>{}: {}</li>", escape_html(name), value));
    }
    body.push_str("</ul></body></html>");
    Ok(Html(body))
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

/// `GET /ping`: store connectivity.
pub(super) async fn ping(State(state): State<ApiState>) -> ApiResult<StatusCode> {
    let result = state.store.ping().await;
    state.health.observe(STORE_SUBSYSTEM, &result).await;
    result?;
    Ok(StatusCode::OK)
}

/// `GET /health`
pub(super) async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let report = state.health.report().await;
    let status = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(report))
}

/// `POST /`: an update without a type.
pub(super) async fn undefined_type() -> ApiError {
    info!("Update without metric type");
    MetricaError::InvalidRequest("metric type is required".into()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>&\"x\""), "&lt;b&gt;&amp;&quot;x&quot;");
        assert_eq!(escape_html("PollCount"), "PollCount");
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let result: Result<Metric, _> = decode(br#"{"id":"a","type":"histogram","value":1}"#);
        assert!(matches!(result, Err(MetricaError::InvalidRequest(_))));
    }
}
