//! Request and response framing.
//!
//! Layer order, outermost first: tracing, response compression,
//! [`track_requests`], [`decompress_request`], [`signatures`]. Signatures are
//! checked against the decompressed body and computed over the uncompressed
//! response.

use super::{ApiError, ApiState};
use axum::body::{to_bytes, Body};
use axum::extract::{MatchedPath, Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use metrica_core::delivery::codec::{self, HASH_HEADER};
use metrica_core::observability::metrics::record_http_request;
use metrica_core::MetricaError;
use tracing::{debug, warn};

/// Largest body buffered for decompression or signing.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

async fn read_body(body: Body) -> Result<axum::body::Bytes, MetricaError> {
    to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| MetricaError::InvalidRequest(format!("cannot read body: {}", e)))
}

/// Count requests by matched route and status.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    record_http_request(&route, response.status().as_u16());
    response
}

/// Inflate `Content-Encoding: gzip` request bodies; 400 when inflation fails.
pub async fn decompress_request(request: Request, next: Next) -> Result<Response, ApiError> {
    let gzipped = request
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"));
    if !gzipped {
        return Ok(next.run(request).await);
    }

    let (mut parts, body) = request.into_parts();
    let compressed = read_body(body).await?;
    let decoded = codec::gunzip(&compressed)?;
    debug!(compressed = compressed.len(), decoded = decoded.len(), "Request body inflated");

    parts.headers.remove(header::CONTENT_ENCODING);
    parts.headers.remove(header::CONTENT_LENGTH);
    Ok(next.run(Request::from_parts(parts, Body::from(decoded))).await)
}

/// Verify signed requests and sign responses when a key is configured.
///
/// Requests without a signature header pass unchecked.
pub async fn signatures(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(key) = state.signing_key.clone() else {
        return Ok(next.run(request).await);
    };

    let request = match request.headers().get(HASH_HEADER) {
        Some(signature) => {
            let signature =
                signature.to_str().map_err(|_| MetricaError::SignatureMismatch)?.to_string();
            let (parts, body) = request.into_parts();
            let bytes = read_body(body).await?;
            if let Err(e) = codec::verify(&bytes, &key, &signature) {
                warn!(path = %parts.uri.path(), "Rejected request with bad signature");
                return Err(e.into());
            }
            Request::from_parts(parts, Body::from(bytes))
        }
        None => request,
    };

    let response = next.run(request).await;

    let (mut parts, body) = response.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| MetricaError::Internal(format!("cannot buffer response: {}", e)))?;
    if !bytes.is_empty() {
        let signature = codec::sign(&bytes, &key);
        if let Ok(value) = HeaderValue::from_str(&signature) {
            parts.headers.insert(HASH_HEADER, value);
        }
    }
    Ok(Response::from_parts(parts, Body::from(bytes)))
}
