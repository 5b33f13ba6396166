//! HTTP/1 transport to local unix-socket endpoints.
//!
//! Every fetch opens a fresh connection, performs a single GET and closes it.
//! Nothing is pooled or retried; the caller bounds the whole exchange with a
//! timeout.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::{header, Method, Request};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::UnixStream;
use tracing::debug;

use crate::discovery::{Endpoint, SocketNamespace};

/// Default timeout of one fetch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Host header sent upstream; the socket address already selects the peer.
const UPSTREAM_HOST: &str = "shim";

/// Error type for a failed fetch.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("abstract unix sockets are not supported on this platform")]
    AbstractUnsupported,

    #[error("HTTP handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("failed to build request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("request failed: {0}")]
    Send(#[source] hyper::Error),

    #[error("failed to read response body: {0}")]
    Body(#[source] hyper::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Fetches a metrics payload from one endpoint.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        endpoint: &Endpoint,
        path: &str,
        timeout: Duration,
    ) -> Result<Bytes, TransportError>;
}

/// [`Fetcher`] speaking HTTP/1.1 over unix-domain sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixSocketFetcher;

#[async_trait]
impl Fetcher for UnixSocketFetcher {
    async fn fetch(
        &self,
        endpoint: &Endpoint,
        path: &str,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        tokio::time::timeout(timeout, get(endpoint, path))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }
}

async fn get(endpoint: &Endpoint, path: &str) -> Result<Bytes, TransportError> {
    let stream = connect(endpoint).await?;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(TransportError::Handshake)?;

    let addr = endpoint.identity.clone();
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Connection to {} closed with error: {}", addr, e);
        }
    });

    let request = Request::builder()
        .method(Method::GET)
        .uri(path)
        .header(header::HOST, UPSTREAM_HOST)
        .header(header::CONNECTION, "close")
        .body(Empty::<Bytes>::new())?;

    let response = sender
        .send_request(request)
        .await
        .map_err(TransportError::Send)?;

    if !response.status().is_success() {
        debug!(
            "Endpoint {} answered {} for {}",
            endpoint.identity,
            response.status(),
            path
        );
    }

    let body = response
        .into_body()
        .collect()
        .await
        .map_err(TransportError::Body)?
        .to_bytes();

    Ok(body)
}

async fn connect(endpoint: &Endpoint) -> Result<UnixStream, TransportError> {
    let addr = &endpoint.identity;
    let result = match endpoint.namespace {
        SocketNamespace::Filesystem => UnixStream::connect(addr).await,
        SocketNamespace::Abstract => connect_abstract(addr).await?,
    };

    result.map_err(|source| TransportError::Connect {
        addr: addr.clone(),
        source,
    })
}

#[cfg(target_os = "linux")]
async fn connect_abstract(name: &str) -> Result<std::io::Result<UnixStream>, TransportError> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::{SocketAddr, UnixStream as StdUnixStream};

    let name = name.to_string();
    let connected = tokio::task::spawn_blocking(move || -> std::io::Result<StdUnixStream> {
        let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
        let stream = StdUnixStream::connect_addr(&addr)?;
        stream.set_nonblocking(true)?;
        Ok(stream)
    })
    .await
    .map_err(std::io::Error::other)
    .and_then(|inner| inner)
    .and_then(UnixStream::from_std);

    Ok(connected)
}

#[cfg(not(target_os = "linux"))]
async fn connect_abstract(_name: &str) -> Result<std::io::Result<UnixStream>, TransportError> {
    Err(TransportError::AbstractUnsupported)
}
