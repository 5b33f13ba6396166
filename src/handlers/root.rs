//! Root endpoint handler for the landing page.

use axum::{extract::State, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the root `/` endpoint.
#[instrument(skip(state))]
pub async fn root_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing / request");

    let version = env!("CARGO_PKG_VERSION");

    let uptime_secs = state.start_time.elapsed().as_secs();
    let hours = uptime_secs / 3600;
    let minutes = (uptime_secs % 3600) / 60;
    let seconds = uptime_secs % 60;

    format!(
        "abstract-socket-proxy {version}\n\
         \n\
         Aggregated metrics: {path}\n\
         Socket table:       {table}\n\
         Socket pattern:     {pattern}\n\
         Uptime:             {hours}h {minutes}m {seconds}s\n",
        version = version,
        path = state.metrics_path(),
        table = state.discoverer.source().display(),
        pattern = state.discoverer.pattern().as_str(),
        hours = hours,
        minutes = minutes,
        seconds = seconds,
    )
}
