//! Application state shared by the HTTP handlers.

use std::sync::Arc;
use std::time::Instant;

use crate::discovery::Discoverer;
use crate::response::BufferPool;
use crate::scrape::ScrapeCoordinator;
use crate::telemetry::ProxyMetrics;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// State shared across concurrent requests.
pub struct AppState {
    pub discoverer: Discoverer,
    pub coordinator: ScrapeCoordinator,
    /// Self metrics; the coordinator holds a second handle to the same registry.
    pub metrics: Arc<ProxyMetrics>,
    /// Encode buffers reused between responses.
    pub buffers: BufferPool,
    /// Server start time for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        discoverer: Discoverer,
        coordinator: ScrapeCoordinator,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Self {
            discoverer,
            coordinator,
            metrics,
            buffers: BufferPool::default(),
            start_time: Instant::now(),
        }
    }

    /// Sub-path served for the merged snapshot and requested from endpoints.
    pub fn metrics_path(&self) -> &str {
        &self.coordinator.settings().metrics_path
    }
}
