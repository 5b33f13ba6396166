//! Prometheus exposition codec.
//!
//! This module turns scraped payloads into [`MetricFamily`] values and turns
//! merged families back into bytes. Upstream endpoints are always read as
//! text format 0.0.4; responses are written in whichever format the caller
//! negotiated through its `Accept` header.

pub mod protobuf;
pub mod text;

use std::io::Write;

use thiserror::Error;

use crate::model::{MetricFamily, MetricKind};

pub use text::decode;

/// Content type of the text exposition format.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Content type of the length-delimited protobuf exposition format.
pub const PROTO_DELIMITED_CONTENT_TYPE: &str =
    "application/vnd.google.protobuf; proto=io.prometheus.client.MetricFamily; encoding=delimited";

const PROTO_MEDIA_TYPE: &str = "application/vnd.google.protobuf";
const PROTO_PROTOCOL: &str = "io.prometheus.client.MetricFamily";
const TEXT_VERSION: &str = "0.0.4";

/// Error raised while decoding a scraped payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("line {line}: {reason}")]
    Syntax { line: usize, reason: String },
}

/// Error raised while encoding a family.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("metric family {family} contains a sample that is not a {kind}")]
    KindMismatch { family: String, kind: MetricKind },

    #[error("failed to write encoded family: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode protobuf message: {0}")]
    Protobuf(#[from] prost::EncodeError),
}

/// Output format selected for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Text,
    ProtoDelimited,
}

impl Format {
    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Text => TEXT_CONTENT_TYPE,
            Format::ProtoDelimited => PROTO_DELIMITED_CONTENT_TYPE,
        }
    }

    /// Picks the output format from an `Accept` header value.
    ///
    /// Media ranges are considered in descending `q` order. Protobuf is only
    /// chosen for the delimited encoding of `io.prometheus.client.MetricFamily`;
    /// `text/plain` is accepted without a version or with version 0.0.4.
    /// The protobuf `text` and `compact-text` encodings are not served; such
    /// ranges are skipped like any other unsupported one.
    /// Anything else falls back to text.
    pub fn negotiate(accept: Option<&str>) -> Format {
        let Some(accept) = accept else {
            return Format::Text;
        };

        for range in parse_accept(accept) {
            if range.media_type == PROTO_MEDIA_TYPE
                && range.param("proto") == Some(PROTO_PROTOCOL)
                && range.param("encoding") == Some("delimited")
            {
                return Format::ProtoDelimited;
            }
            if range.media_type == "text/plain"
                && matches!(range.param("version"), None | Some(TEXT_VERSION))
            {
                return Format::Text;
            }
        }

        Format::Text
    }

    /// Writes one family to `out`.
    pub fn encode(&self, family: &MetricFamily, out: &mut impl Write) -> Result<(), EncodeError> {
        match self {
            Format::Text => text::encode(family, out),
            Format::ProtoDelimited => protobuf::encode(family, out),
        }
    }
}

/// One media range of an `Accept` header.
#[derive(Debug)]
struct MediaRange {
    media_type: String,
    params: Vec<(String, String)>,
    q: f64,
}

impl MediaRange {
    fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Splits an `Accept` header into media ranges sorted by descending quality.
fn parse_accept(header: &str) -> Vec<MediaRange> {
    let mut ranges: Vec<MediaRange> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let media_type = pieces.next()?.trim().to_ascii_lowercase();
            if media_type.is_empty() {
                return None;
            }

            let mut q = 1.0;
            let mut params = Vec::new();
            for piece in pieces {
                let Some((key, value)) = piece.split_once('=') else {
                    continue;
                };
                let key = key.trim().to_ascii_lowercase();
                let value = value.trim().trim_matches('"').to_string();
                if key == "q" {
                    q = value.parse().unwrap_or(0.0);
                } else {
                    params.push((key, value));
                }
            }

            Some(MediaRange {
                media_type,
                params,
                q,
            })
        })
        .collect();

    // Stable sort keeps header order among equal weights.
    ranges.sort_by(|a, b| b.q.partial_cmp(&a.q).unwrap_or(std::cmp::Ordering::Equal));
    ranges
}
