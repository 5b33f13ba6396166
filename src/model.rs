//! Metric family model shared by the codec, the coordinator and the merge engine.
//!
//! A [`MetricFamily`] is owned by exactly one pipeline stage at a time: the
//! decoder produces it, the tag injector rewrites it in place, and the merge
//! engine either adopts it or drains its samples into an existing family.

use std::fmt;

/// Declared type of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
    #[default]
    Untyped,
}

impl MetricKind {
    /// Parses the keyword used on `# TYPE` lines.
    pub fn from_type_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "counter" => Some(MetricKind::Counter),
            "gauge" => Some(MetricKind::Gauge),
            "histogram" => Some(MetricKind::Histogram),
            "summary" => Some(MetricKind::Summary),
            "untyped" => Some(MetricKind::Untyped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
            MetricKind::Untyped => "untyped",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One histogram bucket: cumulative count of observations `<= upper_bound`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub upper_bound: f64,
    pub cumulative_count: f64,
}

/// One summary quantile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantile {
    pub quantile: f64,
    pub value: f64,
}

/// Value carried by a sample. Counters, gauges and untyped metrics share
/// the scalar shape.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Scalar(f64),
    Histogram {
        buckets: Vec<Bucket>,
        sum: f64,
        count: f64,
    },
    Summary {
        quantiles: Vec<Quantile>,
        sum: f64,
        count: f64,
    },
}

impl SampleValue {
    /// Whether this value can be exposed under a family of `kind`.
    pub fn fits(&self, kind: MetricKind) -> bool {
        match self {
            SampleValue::Scalar(_) => matches!(
                kind,
                MetricKind::Counter | MetricKind::Gauge | MetricKind::Untyped
            ),
            SampleValue::Histogram { .. } => kind == MetricKind::Histogram,
            SampleValue::Summary { .. } => kind == MetricKind::Summary,
        }
    }
}

/// One labelled observation within a family.
///
/// Labels are kept as an ordered list rather than a map: endpoint tags are
/// appended after the labels the endpoint reported, and a tag whose name
/// collides with an existing label is kept alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: Vec<(String, String)>,
    pub value: SampleValue,
    pub timestamp_ms: Option<i64>,
}

impl Sample {
    pub fn scalar(labels: Vec<(String, String)>, value: f64) -> Self {
        Self {
            labels,
            value: SampleValue::Scalar(value),
            timestamp_ms: None,
        }
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A named group of samples sharing one declared kind.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: Option<String>,
    pub kind: MetricKind,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            help: None,
            kind,
            samples: Vec::new(),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_sample(mut self, sample: Sample) -> Self {
        self.samples.push(sample);
        self
    }
}
