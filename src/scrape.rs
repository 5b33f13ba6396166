//! Concurrent scraping of discovered endpoints.
//!
//! One task is spawned per endpoint and the coordinator waits for all of them.
//! A failing endpoint is logged and counted but never aborts its siblings or
//! the request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap as HashMap;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{debug, error};

use crate::discovery::Endpoint;
use crate::exposition::{self, DecodeError};
use crate::model::MetricFamily;
use crate::telemetry::ProxyMetrics;
use crate::transport::{Fetcher, TransportError, DEFAULT_TIMEOUT};

/// Default sub-path requested from every endpoint.
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

/// Error type for a single endpoint scrape.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to decode metrics: {0}")]
    Decode(#[from] DecodeError),
}

/// Outcome of scraping one endpoint.
#[derive(Debug)]
pub enum ScrapeResult {
    Success {
        endpoint: Endpoint,
        families: Vec<MetricFamily>,
    },
    Failure {
        endpoint: Endpoint,
        error: ScrapeError,
    },
}

/// Settings shared by every scrape task.
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    /// Sub-path requested from each endpoint.
    pub metrics_path: String,
    /// Bound on one endpoint's fetch.
    pub timeout: Duration,
    /// Optional cap on in-flight fetches per request. `None` spawns every
    /// task immediately.
    pub max_concurrent: Option<usize>,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            metrics_path: DEFAULT_METRICS_PATH.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_concurrent: None,
        }
    }
}

/// Fans out one fetch-and-decode task per endpoint and fans the results in.
pub struct ScrapeCoordinator {
    fetcher: Arc<dyn Fetcher>,
    metrics: Arc<ProxyMetrics>,
    settings: ScrapeSettings,
}

impl ScrapeCoordinator {
    pub fn new(fetcher: Arc<dyn Fetcher>, metrics: Arc<ProxyMetrics>, settings: ScrapeSettings) -> Self {
        Self {
            fetcher,
            metrics,
            settings,
        }
    }

    pub fn settings(&self) -> &ScrapeSettings {
        &self.settings
    }

    /// Scrapes every endpoint and returns once all tasks have finished.
    ///
    /// Results arrive in completion order, which differs between runs.
    pub async fn scrape_all(&self, endpoints: HashMap<String, Endpoint>) -> Vec<ScrapeResult> {
        self.metrics
            .listening_socket_count
            .set(endpoints.len() as i64);

        if endpoints.is_empty() {
            return Vec::new();
        }

        let limiter = self
            .settings
            .max_concurrent
            .map(|permits| Arc::new(Semaphore::new(permits)));

        let mut tasks = JoinSet::new();
        let mut identities: HashMap<task::Id, String> = HashMap::with_capacity(endpoints.len());
        for endpoint in endpoints.into_values() {
            let fetcher = Arc::clone(&self.fetcher);
            let limiter = limiter.clone();
            let path = self.settings.metrics_path.clone();
            let timeout = self.settings.timeout;

            debug!("Scrape job started for {}", endpoint.identity);
            let identity = endpoint.identity.clone();
            let handle = tasks.spawn(async move {
                let _permit = match limiter {
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };
                let outcome = scrape_endpoint(fetcher.as_ref(), &endpoint, &path, timeout).await;
                (endpoint, outcome)
            });
            identities.insert(handle.id(), identity);
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((endpoint, Ok(families))) => {
                    debug!(
                        "Scrape job finished for {} ({} families)",
                        endpoint.identity,
                        families.len()
                    );
                    results.push(ScrapeResult::Success { endpoint, families });
                }
                Ok((endpoint, Err(error))) => {
                    error!(
                        addr = %endpoint.identity,
                        "Failed to get metrics from one socket: {}", error
                    );
                    self.metrics.scrape_failed_count.inc();
                    results.push(ScrapeResult::Failure { endpoint, error });
                }
                Err(e) => {
                    let addr = identities
                        .get(&e.id())
                        .map(String::as_str)
                        .unwrap_or("unknown");
                    error!(addr = %addr, "Scrape task did not complete: {}", e);
                    self.metrics.scrape_failed_count.inc();
                }
            }
        }

        debug!("All scrape jobs finished");
        results
    }
}

/// Fetches, decodes and tags one endpoint's families.
async fn scrape_endpoint(
    fetcher: &dyn Fetcher,
    endpoint: &Endpoint,
    path: &str,
    timeout: Duration,
) -> Result<Vec<MetricFamily>, ScrapeError> {
    let body = fetcher.fetch(endpoint, path, timeout).await?;
    let families = exposition::decode(&body)?;
    Ok(inject_tags(&endpoint.tags, families))
}

/// Appends the endpoint's tags as labels to every sample.
///
/// Existing labels are left untouched, so a tag sharing a name with a label
/// the endpoint already reported produces two labels of that name.
pub fn inject_tags(
    tags: &BTreeMap<String, String>,
    mut families: Vec<MetricFamily>,
) -> Vec<MetricFamily> {
    if tags.is_empty() {
        return families;
    }

    for family in &mut families {
        for sample in &mut family.samples {
            sample
                .labels
                .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    families
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::SocketNamespace;
    use crate::model::{MetricKind, Sample, SampleValue};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Instant;

    /// Panics for every endpoint.
    struct PanickingFetcher;

    #[async_trait]
    impl Fetcher for PanickingFetcher {
        async fn fetch(
            &self,
            endpoint: &Endpoint,
            _path: &str,
            _timeout: Duration,
        ) -> Result<Bytes, TransportError> {
            panic!("fetcher crashed on {}", endpoint.identity);
        }
    }

    /// Serves canned payloads keyed by endpoint identity.
    struct CannedFetcher {
        payloads: HashMap<String, &'static str>,
        delay: Duration,
    }

    #[async_trait]
    impl Fetcher for CannedFetcher {
        async fn fetch(
            &self,
            endpoint: &Endpoint,
            _path: &str,
            _timeout: Duration,
        ) -> Result<Bytes, TransportError> {
            tokio::time::sleep(self.delay).await;
            match self.payloads.get(&endpoint.identity) {
                Some(body) => Ok(Bytes::from_static(body.as_bytes())),
                None => Err(TransportError::Connect {
                    addr: endpoint.identity.clone(),
                    source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                }),
            }
        }
    }

    fn endpoint(identity: &str, sandbox: &str) -> Endpoint {
        Endpoint {
            identity: identity.to_string(),
            namespace: SocketNamespace::Abstract,
            tags: BTreeMap::from([("sandbox".to_string(), sandbox.to_string())]),
        }
    }

    fn endpoints(list: Vec<Endpoint>) -> HashMap<String, Endpoint> {
        list.into_iter().map(|e| (e.identity.clone(), e)).collect()
    }

    fn coordinator(
        payloads: Vec<(&str, &'static str)>,
        delay: Duration,
        max_concurrent: Option<usize>,
    ) -> (ScrapeCoordinator, Arc<ProxyMetrics>) {
        let metrics = Arc::new(ProxyMetrics::new().unwrap());
        let fetcher = CannedFetcher {
            payloads: payloads
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            delay,
        };
        let settings = ScrapeSettings {
            max_concurrent,
            ..ScrapeSettings::default()
        };
        (
            ScrapeCoordinator::new(Arc::new(fetcher), Arc::clone(&metrics), settings),
            metrics,
        )
    }

    #[test]
    fn test_inject_tags_appends_after_existing_labels() {
        let family = MetricFamily::new("kata_shim_fds", MetricKind::Gauge).with_sample(
            Sample::scalar(vec![("sandbox".into(), "reported".into())], 3.0),
        );
        let tags = BTreeMap::from([
            ("pod".to_string(), "web".to_string()),
            ("sandbox".to_string(), "abc".to_string()),
        ]);

        let tagged = inject_tags(&tags, vec![family]);
        assert_eq!(
            tagged[0].samples[0].labels,
            vec![
                ("sandbox".to_string(), "reported".to_string()),
                ("pod".to_string(), "web".to_string()),
                ("sandbox".to_string(), "abc".to_string()),
            ]
        );
    }

    #[test]
    fn test_inject_tags_covers_every_sample() {
        let family = MetricFamily::new("latency", MetricKind::Histogram)
            .with_sample(Sample {
                labels: vec![],
                value: SampleValue::Histogram {
                    buckets: vec![],
                    sum: 0.0,
                    count: 0.0,
                },
                timestamp_ms: None,
            })
            .with_sample(Sample {
                labels: vec![("action".into(), "start".into())],
                value: SampleValue::Histogram {
                    buckets: vec![],
                    sum: 0.0,
                    count: 0.0,
                },
                timestamp_ms: None,
            });
        let tags = BTreeMap::from([("sandbox".to_string(), "abc".to_string())]);

        let tagged = inject_tags(&tags, vec![family]);
        for sample in &tagged[0].samples {
            assert_eq!(sample.label("sandbox"), Some("abc"));
        }
    }

    #[tokio::test]
    async fn test_failed_endpoint_is_isolated() {
        let (coordinator, metrics) = coordinator(
            vec![("/b/shim-monitor.sock", "# TYPE kata_shim_fds gauge\nkata_shim_fds 9\n")],
            Duration::ZERO,
            None,
        );

        let results = coordinator
            .scrape_all(endpoints(vec![
                endpoint("/a/shim-monitor.sock", "a"),
                endpoint("/b/shim-monitor.sock", "b"),
            ]))
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(metrics.scrape_failed_count.get(), 1);
        assert_eq!(metrics.listening_socket_count.get(), 2);

        let success = results
            .iter()
            .find_map(|r| match r {
                ScrapeResult::Success { endpoint, families } => Some((endpoint, families)),
                ScrapeResult::Failure { .. } => None,
            })
            .expect("one endpoint succeeded");
        assert_eq!(success.0.identity, "/b/shim-monitor.sock");
        assert_eq!(success.1[0].samples[0].label("sandbox"), Some("b"));

        assert!(results.iter().any(|r| matches!(
            r,
            ScrapeResult::Failure {
                error: ScrapeError::Transport(TransportError::Connect { .. }),
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_decode_failure_is_counted() {
        let (coordinator, metrics) =
            coordinator(vec![("/a.sock", "this is { not metrics\n")], Duration::ZERO, None);

        let results = coordinator
            .scrape_all(endpoints(vec![endpoint("/a.sock", "a")]))
            .await;

        assert!(matches!(
            results.as_slice(),
            [ScrapeResult::Failure {
                error: ScrapeError::Decode(_),
                ..
            }]
        ));
        assert_eq!(metrics.scrape_failed_count.get(), 1);
    }

    #[tokio::test]
    async fn test_panicked_task_counts_as_failure() {
        let metrics = Arc::new(ProxyMetrics::new().unwrap());
        let coordinator = ScrapeCoordinator::new(
            Arc::new(PanickingFetcher),
            Arc::clone(&metrics),
            ScrapeSettings::default(),
        );

        let results = coordinator
            .scrape_all(endpoints(vec![
                endpoint("/a.sock", "a"),
                endpoint("/b.sock", "b"),
            ]))
            .await;

        // No result survives a panicked task, but each one is counted.
        assert!(results.is_empty());
        assert_eq!(metrics.scrape_failed_count.get(), 2);
        assert_eq!(metrics.listening_socket_count.get(), 2);
    }

    #[tokio::test]
    async fn test_no_endpoints_resets_gauge() {
        let (coordinator, metrics) = coordinator(vec![], Duration::ZERO, None);
        metrics.listening_socket_count.set(7);

        let results = coordinator.scrape_all(HashMap::new()).await;
        assert!(results.is_empty());
        assert_eq!(metrics.listening_socket_count.get(), 0);
    }

    #[tokio::test]
    async fn test_endpoints_are_scraped_in_parallel() {
        let payloads: Vec<(&str, &'static str)> = vec![
            ("/0.sock", "up 1\n"),
            ("/1.sock", "up 1\n"),
            ("/2.sock", "up 1\n"),
            ("/3.sock", "up 1\n"),
            ("/4.sock", "up 1\n"),
            ("/5.sock", "up 1\n"),
            ("/6.sock", "up 1\n"),
            ("/7.sock", "up 1\n"),
        ];
        let list = payloads
            .iter()
            .map(|(id, _)| endpoint(id, id))
            .collect::<Vec<_>>();
        let (coordinator, _) = coordinator(payloads, Duration::from_millis(200), None);

        let start = Instant::now();
        let results = coordinator.scrape_all(endpoints(list)).await;

        assert_eq!(results.len(), 8);
        assert!(
            start.elapsed() < Duration::from_millis(1200),
            "scrapes ran sequentially: {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn test_concurrency_cap_serializes_fetches() {
        let payloads: Vec<(&str, &'static str)> =
            vec![("/0.sock", "up 1\n"), ("/1.sock", "up 1\n"), ("/2.sock", "up 1\n")];
        let list = payloads
            .iter()
            .map(|(id, _)| endpoint(id, id))
            .collect::<Vec<_>>();
        let (coordinator, _) = coordinator(payloads, Duration::from_millis(100), Some(1));

        let start = Instant::now();
        let results = coordinator.scrape_all(endpoints(list)).await;

        assert_eq!(results.len(), 3);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }
}
