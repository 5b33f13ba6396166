//! Abstract Socket Metrics Proxy Library
//!
//! Aggregates Prometheus metrics from many local processes that each expose
//! an HTTP metrics endpoint on a unix-domain socket, typically in the Linux
//! abstract namespace. Per request the proxy:
//!
//! 1. reads the kernel's unix socket table and keeps the addresses matching a
//!    configured pattern ([`discovery`]),
//! 2. scrapes every endpoint concurrently over HTTP/1 ([`scrape`], [`transport`]),
//! 3. labels each endpoint's samples with the pattern's named captures,
//! 4. merges same-named families together with its own self metrics
//!    ([`merge`], [`telemetry`]),
//! 5. encodes the result in the negotiated exposition format, optionally
//!    gzipped ([`response`], [`exposition`]).
//!
//! # Usage
//!
//! ```rust
//! use abstract_socket_proxy::discovery::{parse_socket_table, SocketNamespace};
//! use regex::Regex;
//!
//! let pattern = Regex::new(r"@/run/vc/(?P<sandbox>[0-9a-f]+)/shim-monitor\.sock@").unwrap();
//! let table = "\
//! Num       RefCount Protocol Flags    Type St Inode Path
//! ffff0001: 00000002 00000000 00010000 0001 01 1001 @/run/vc/ab12/shim-monitor.sock@
//! ffff0002: 00000002 00000000 00010000 0001 01 1002 @/run/vc/ab12/shim.sock@
//! ";
//!
//! let endpoints = parse_socket_table(&pattern, table);
//! let endpoint = &endpoints["/run/vc/ab12/shim-monitor.sock"];
//! assert_eq!(endpoint.namespace, SocketNamespace::Abstract);
//! assert_eq!(endpoint.tags["sandbox"], "ab12");
//! ```

pub mod discovery;
pub mod exposition;
pub mod handlers;
pub mod merge;
pub mod model;
pub mod response;
pub mod scrape;
pub mod state;
pub mod telemetry;
pub mod transport;

pub use discovery::{Discoverer, DiscoveryError, Endpoint, SocketNamespace};
pub use exposition::Format;
pub use handlers::router;
pub use merge::{merge, MergedSnapshot};
pub use model::{MetricFamily, MetricKind, Sample, SampleValue};
pub use scrape::{ScrapeCoordinator, ScrapeResult, ScrapeSettings};
pub use state::{AppState, SharedState};
pub use telemetry::ProxyMetrics;
pub use transport::{Fetcher, TransportError, UnixSocketFetcher};
