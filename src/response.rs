//! Response encoding: content negotiation, compression and buffer reuse.

use std::io::{self, Write};
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use axum::http::{header, HeaderMap};
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, error};

use crate::exposition::Format;
use crate::merge::MergedSnapshot;

/// Initial capacity of a fresh encode buffer.
const BUFFER_CAP: usize = 512 * 1024;

/// Buffers that grew beyond this are dropped instead of pooled.
const MAX_POOLED_CAPACITY: usize = 16 * 1024 * 1024;

/// Default number of idle buffers kept.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Returns whether the request's `Accept-Encoding` lists gzip.
///
/// Tokens are comma-separated and trimmed; `gzip` or any `gzip;...`
/// parameterised form matches. The comparison is case-sensitive.
pub fn gzip_accepted(headers: &HeaderMap) -> bool {
    let Some(value) = headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    value
        .split(',')
        .map(str::trim)
        .any(|part| part == "gzip" || part.starts_with("gzip;"))
}

/// Pool of encode buffers shared by concurrent responses.
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
}

impl BufferPool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
        }
    }

    /// Takes an empty buffer; it returns to the pool when dropped.
    pub fn get(&self) -> PooledBuffer<'_> {
        let buf = self
            .idle
            .lock()
            .ok()
            .and_then(|mut idle| idle.pop())
            .unwrap_or_else(|| Vec::with_capacity(BUFFER_CAP));

        PooledBuffer { buf, pool: self }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() == 0 || buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        buf.clear();
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(buf);
            }
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

/// Buffer borrowed from a [`BufferPool`].
pub struct PooledBuffer<'a> {
    buf: Vec<u8>,
    pool: &'a BufferPool,
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.buf));
    }
}

/// Writer the families are encoded through.
enum BodyWriter<'a> {
    Plain(&'a mut Vec<u8>),
    Gzip(GzEncoder<&'a mut Vec<u8>>),
}

impl Write for BodyWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            BodyWriter::Plain(buf) => buf.write(data),
            BodyWriter::Gzip(encoder) => encoder.write(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BodyWriter::Plain(_) => Ok(()),
            BodyWriter::Gzip(encoder) => encoder.flush(),
        }
    }
}

impl BodyWriter<'_> {
    fn finish(self) -> io::Result<()> {
        match self {
            BodyWriter::Plain(_) => Ok(()),
            BodyWriter::Gzip(encoder) => encoder.finish().map(|_| ()),
        }
    }
}

/// Encoded response body plus the headers describing it.
#[derive(Debug, Clone)]
pub struct EncodedBody {
    pub content_type: &'static str,
    pub gzip: bool,
    pub body: Bytes,
}

/// Encodes every family of the snapshot in `format`, optionally gzipped.
///
/// A family that fails to encode is logged and ends the body; whatever was
/// written before it is kept. Only a failure to finish the gzip stream is
/// returned as an error.
///
/// Bodies larger than the initial buffer capacity take the buffer with them
/// instead of being copied, so that buffer is not pooled again.
pub fn encode_snapshot(
    snapshot: &MergedSnapshot,
    format: Format,
    gzip: bool,
    pool: &BufferPool,
) -> io::Result<EncodedBody> {
    let mut staging = pool.get();

    let mut writer = if gzip {
        BodyWriter::Gzip(GzEncoder::new(&mut *staging, Compression::default()))
    } else {
        BodyWriter::Plain(&mut *staging)
    };

    for family in snapshot.families() {
        if let Err(e) = format.encode(family, &mut writer) {
            error!("Failed to encode metric family {}: {}", family.name, e);
            break;
        }
    }

    writer.finish()?;

    debug!(
        "Encoded {} families into {} bytes (gzip: {})",
        snapshot.len(),
        staging.len(),
        gzip
    );

    let body = if staging.len() > BUFFER_CAP {
        Bytes::from(std::mem::take(&mut *staging))
    } else {
        Bytes::copy_from_slice(&staging)
    };

    Ok(EncodedBody {
        content_type: format.content_type(),
        gzip,
        body,
    })
}
