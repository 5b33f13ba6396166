//! Self-instrumentation of the proxy.
//!
//! The registry is owned by [`ProxyMetrics`] and handed to the handler and the
//! scrape coordinator at construction. All counters are atomics, so concurrent
//! requests and scrape tasks can update them without further locking.

use std::time::Instant;

use prometheus::{
    exponential_buckets, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry,
    TextEncoder,
};
use thiserror::Error;

use crate::exposition::{self, DecodeError};
use crate::model::MetricFamily;

/// Prefix of every self-reported metric.
pub const NAMESPACE: &str = "prom_proxy";

/// Error type for self metrics failures.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to register metric: {0}")]
    Register(#[from] prometheus::Error),

    #[error("failed to encode self metrics: {0}")]
    Encode(#[source] prometheus::Error),

    #[error("failed to decode self metrics: {0}")]
    Decode(#[from] DecodeError),
}

/// Process-wide counters that outlive a single request.
pub struct ProxyMetrics {
    registry: Registry,
    pub listening_socket_count: IntGauge,
    pub scrape_count: IntCounter,
    pub scrape_failed_count: IntCounter,
    pub scrape_durations: Histogram,
}

impl ProxyMetrics {
    /// Creates and registers all self metrics with a fresh registry.
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();

        let listening_socket_count = IntGauge::with_opts(
            Opts::new("listening_socket_count", "Listening socket count.").namespace(NAMESPACE),
        )?;
        let scrape_count = IntCounter::with_opts(
            Opts::new("scrape_count", "Scrape count.").namespace(NAMESPACE),
        )?;
        let scrape_failed_count = IntCounter::with_opts(
            Opts::new("scrape_failed_count", "Failed scrape count.").namespace(NAMESPACE),
        )?;
        let scrape_durations = Histogram::with_opts(
            HistogramOpts::new(
                "scrape_durations_histogram_milliseconds",
                "Time used to scrape from shims",
            )
            .namespace(NAMESPACE)
            .buckets(exponential_buckets(1.0, 2.0, 10)?),
        )?;

        registry.register(Box::new(listening_socket_count.clone()))?;
        registry.register(Box::new(scrape_count.clone()))?;
        registry.register(Box::new(scrape_failed_count.clone()))?;
        registry.register(Box::new(scrape_durations.clone()))?;

        Ok(Self {
            registry,
            listening_socket_count,
            scrape_count,
            scrape_failed_count,
            scrape_durations,
        })
    }

    /// Snapshots the registry as metric families, sorted by name.
    pub fn gather(&self) -> Result<Vec<MetricFamily>, TelemetryError> {
        let families = self.registry.gather();

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(TelemetryError::Encode)?;

        Ok(exposition::decode(&buffer)?)
    }

    /// Starts timing one inbound request.
    pub fn start_timer(&self) -> ScrapeTimer<'_> {
        ScrapeTimer {
            histogram: &self.scrape_durations,
            start: Instant::now(),
        }
    }
}

/// Observes the elapsed milliseconds into the duration histogram on drop.
pub struct ScrapeTimer<'a> {
    histogram: &'a Histogram,
    start: Instant,
}

impl Drop for ScrapeTimer<'_> {
    fn drop(&mut self) {
        self.histogram
            .observe(self.start.elapsed().as_millis() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricKind, SampleValue};

    #[test]
    fn test_gather_reports_all_self_metrics() {
        let metrics = ProxyMetrics::new().unwrap();
        metrics.scrape_count.inc();
        metrics.scrape_failed_count.inc_by(2);
        metrics.listening_socket_count.set(3);
        metrics.scrape_durations.observe(5.0);

        let families = metrics.gather().unwrap();
        let names: Vec<_> = families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "prom_proxy_listening_socket_count",
                "prom_proxy_scrape_count",
                "prom_proxy_scrape_durations_histogram_milliseconds",
                "prom_proxy_scrape_failed_count",
            ]
        );

        let failed = &families[3];
        assert_eq!(failed.kind, MetricKind::Counter);
        assert_eq!(failed.samples[0].value, SampleValue::Scalar(2.0));

        let durations = &families[2];
        assert_eq!(durations.kind, MetricKind::Histogram);
        match &durations.samples[0].value {
            SampleValue::Histogram { buckets, count, .. } => {
                // 10 exponential buckets plus +Inf.
                assert_eq!(buckets.len(), 11);
                assert_eq!(*count, 1.0);
            }
            other => panic!("expected histogram, got {:?}", other),
        }
    }

    #[test]
    fn test_timer_observes_on_drop() {
        let metrics = ProxyMetrics::new().unwrap();
        {
            let _timer = metrics.start_timer();
        }
        assert_eq!(metrics.scrape_durations.get_sample_count(), 1);
    }

    #[test]
    fn test_registries_are_independent() {
        let first = ProxyMetrics::new().unwrap();
        let second = ProxyMetrics::new().unwrap();
        first.scrape_count.inc();
        assert_eq!(first.scrape_count.get(), 1);
        assert_eq!(second.scrape_count.get(), 0);
    }
}
