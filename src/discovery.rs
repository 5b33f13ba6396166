//! Endpoint discovery from the kernel's unix socket table.
//!
//! This module reads `/proc/net/unix` (or any file in the same layout), keeps
//! the listening addresses matching the configured pattern and derives the
//! identity tags of each endpoint from the pattern's named capture groups.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ahash::AHashMap as HashMap;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, trace};

/// Default location of the unix socket table.
pub const DEFAULT_SOCKET_TABLE: &str = "/proc/net/unix";

/// Number of fields on a socket table line that carries an address.
const SOCKET_TABLE_FIELDS: usize = 8;

/// Position of the address field.
const ADDRESS_FIELD: usize = 7;

/// Marker the kernel uses for abstract-namespace addresses.
const ABSTRACT_SENTINEL: char = '@';

/// Suffix of the slot field that starts every socket entry.
const SLOT_SUFFIX: char = ':';

/// Error type for discovery failures.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery pattern is not set")]
    PatternNotSet,

    #[error("failed to read socket table {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Namespace an endpoint's socket lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketNamespace {
    /// Linux abstract namespace, not backed by a file.
    Abstract,
    /// Regular socket file on disk.
    Filesystem,
}

/// A discovered metrics endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Address with the abstract-namespace markers stripped.
    pub identity: String,
    pub namespace: SocketNamespace,
    /// Values of the pattern's named capture groups.
    pub tags: BTreeMap<String, String>,
}

/// Discovers endpoints by matching a pattern against the socket table.
#[derive(Debug, Clone)]
pub struct Discoverer {
    pattern: Regex,
    source: PathBuf,
}

impl Discoverer {
    /// Creates a discoverer. A missing pattern is rejected here so the
    /// process never starts serving without one.
    pub fn new(pattern: Option<Regex>, source: impl Into<PathBuf>) -> Result<Self, DiscoveryError> {
        let pattern = pattern.ok_or(DiscoveryError::PatternNotSet)?;
        Ok(Self {
            pattern,
            source: source.into(),
        })
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Reads the current socket table and returns the matching endpoints
    /// keyed by identity.
    pub async fn discover(&self) -> Result<HashMap<String, Endpoint>, DiscoveryError> {
        let table = tokio::fs::read_to_string(&self.source)
            .await
            .map_err(|source| DiscoveryError::Read {
                path: self.source.clone(),
                source,
            })?;

        let endpoints = parse_socket_table(&self.pattern, &table);
        debug!(
            "Discovered {} endpoints in {}",
            endpoints.len(),
            self.source.display()
        );
        Ok(endpoints)
    }
}

/// Extracts endpoints from socket table contents.
///
/// The header line, lines without exactly eight fields and lines whose
/// address does not match are skipped. When two lines normalize to the same address the first one wins.
pub fn parse_socket_table(pattern: &Regex, table: &str) -> HashMap<String, Endpoint> {
    let mut endpoints: HashMap<String, Endpoint> = HashMap::new();

    for line in table.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != SOCKET_TABLE_FIELDS || !fields[0].ends_with(SLOT_SUFFIX) {
            continue;
        }

        let raw_addr = fields[ADDRESS_FIELD];
        let Some(captures) = pattern.captures(raw_addr) else {
            continue;
        };

        let identity = raw_addr.trim_matches(ABSTRACT_SENTINEL);
        if endpoints.contains_key(identity) {
            trace!("Skipping duplicate socket entry for {}", identity);
            continue;
        }

        let tags = pattern
            .capture_names()
            .flatten()
            .map(|name| {
                let value = captures.name(name).map_or("", |m| m.as_str());
                (name.to_string(), value.to_string())
            })
            .collect();

        let namespace = if raw_addr.starts_with(ABSTRACT_SENTINEL) {
            SocketNamespace::Abstract
        } else {
            SocketNamespace::Filesystem
        };

        endpoints.insert(
            identity.to_string(),
            Endpoint {
                identity: identity.to_string(),
                namespace,
                tags,
            },
        );
    }

    endpoints
}
