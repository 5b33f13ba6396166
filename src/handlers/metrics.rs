//! Metrics endpoint handler.
//!
//! Every request runs one discovery pass, scrapes all endpoints concurrently,
//! merges their families with the proxy's own and encodes the result in the
//! negotiated format. Nothing is cached between requests.

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, error, instrument};

use crate::discovery::DiscoveryError;
use crate::exposition::Format;
use crate::merge::merge;
use crate::response::{encode_snapshot, gzip_accepted, EncodedBody};
use crate::state::SharedState;
use crate::telemetry::TelemetryError;

/// Whole-request failures of the metrics endpoint.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("failed to encode response: {0}")]
    Encode(#[from] std::io::Error),
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

impl IntoResponse for EncodedBody {
    fn into_response(self) -> Response {
        let mut response = self.body.into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.content_type),
        );
        if self.gzip {
            headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        response
    }
}

/// Handler for the metrics endpoint.
#[instrument(skip(state, headers))]
pub async fn metrics_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<EncodedBody, MetricsError> {
    let _timer = state.metrics.start_timer();
    state.metrics.scrape_count.inc();
    debug!("Processing metrics request");

    let format = Format::negotiate(
        headers
            .get(header::ACCEPT)
            .and_then(|value| value.to_str().ok()),
    );
    let gzip = gzip_accepted(&headers);

    let endpoints = match state.discoverer.discover().await {
        Ok(endpoints) => endpoints,
        Err(e) => {
            error!("Failed to discover sockets: {}", e);
            state.metrics.scrape_failed_count.inc();
            return Err(e.into());
        }
    };
    debug!("Discovered {} endpoints", endpoints.len());

    let results = state.coordinator.scrape_all(endpoints).await;

    let self_families = state.metrics.gather().map_err(|e| {
        error!("Failed to gather self metrics: {}", e);
        e
    })?;

    let snapshot = merge(self_families, results);

    let body = encode_snapshot(&snapshot, format, gzip, &state.buffers).map_err(|e| {
        error!("Failed to finish response body: {}", e);
        e
    })?;

    debug!(
        "Serving {} families as {} ({} bytes)",
        snapshot.len(),
        body.content_type,
        body.body.len()
    );
    Ok(body)
}
