//! HTTP endpoint handlers for the proxy.
//!
//! - `{metrics_path}`: merged metrics of every discovered endpoint
//! - `/`: plain-text landing page

pub mod metrics;
pub mod root;

use axum::{routing::get, Router};

use crate::state::SharedState;

// Re-export handlers
pub use metrics::metrics_handler;
pub use root::root_handler;

/// Checks that `path` can be registered as a static route.
///
/// The router rejects segments that look like captures or wildcards, so
/// those are refused here before the server is built.
pub fn validate_route_path(path: &str) -> Result<(), String> {
    if !path.starts_with('/') {
        return Err(format!("metrics_path must start with '/': {}", path));
    }

    for segment in path.split('/') {
        if segment.starts_with(':') || segment.starts_with('*') {
            return Err(format!(
                "metrics_path segment '{}' must not start with ':' or '*': {}",
                segment, path
            ));
        }
        if segment.contains('{') || segment.contains('}') {
            return Err(format!(
                "metrics_path segment '{}' must not contain '{{' or '}}': {}",
                segment, path
            ));
        }
    }

    Ok(())
}

/// Builds the router serving the proxy's endpoints.
///
/// The metrics path must pass [`validate_route_path`].
pub fn router(state: SharedState) -> Router {
    let metrics_path = state.metrics_path().to_string();

    let mut app = Router::new().route(&metrics_path, get(metrics_handler));
    if metrics_path != "/" {
        app = app.route("/", get(root_handler));
    }

    app.with_state(state)
}
