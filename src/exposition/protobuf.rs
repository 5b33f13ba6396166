//! Length-delimited protobuf exposition (`io.prometheus.client.MetricFamily`).
//!
//! The message types mirror `metrics.proto` from the Prometheus client model.

use std::io::Write;

use prost::Message;

use super::EncodeError;
use crate::model::{MetricFamily, MetricKind, SampleValue};

#[derive(Clone, PartialEq, Message)]
pub struct LabelPair {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub value: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Gauge {
    #[prost(double, optional, tag = "1")]
    pub value: Option<f64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Counter {
    #[prost(double, optional, tag = "1")]
    pub value: Option<f64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Quantile {
    #[prost(double, optional, tag = "1")]
    pub quantile: Option<f64>,
    #[prost(double, optional, tag = "2")]
    pub value: Option<f64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Summary {
    #[prost(uint64, optional, tag = "1")]
    pub sample_count: Option<u64>,
    #[prost(double, optional, tag = "2")]
    pub sample_sum: Option<f64>,
    #[prost(message, repeated, tag = "3")]
    pub quantile: Vec<Quantile>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Untyped {
    #[prost(double, optional, tag = "1")]
    pub value: Option<f64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Bucket {
    #[prost(uint64, optional, tag = "1")]
    pub cumulative_count: Option<u64>,
    #[prost(double, optional, tag = "2")]
    pub upper_bound: Option<f64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Histogram {
    #[prost(uint64, optional, tag = "1")]
    pub sample_count: Option<u64>,
    #[prost(double, optional, tag = "2")]
    pub sample_sum: Option<f64>,
    #[prost(message, repeated, tag = "3")]
    pub bucket: Vec<Bucket>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Metric {
    #[prost(message, repeated, tag = "1")]
    pub label: Vec<LabelPair>,
    #[prost(message, optional, tag = "2")]
    pub gauge: Option<Gauge>,
    #[prost(message, optional, tag = "3")]
    pub counter: Option<Counter>,
    #[prost(message, optional, tag = "4")]
    pub summary: Option<Summary>,
    #[prost(message, optional, tag = "5")]
    pub untyped: Option<Untyped>,
    #[prost(int64, optional, tag = "6")]
    pub timestamp_ms: Option<i64>,
    #[prost(message, optional, tag = "7")]
    pub histogram: Option<Histogram>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MetricType {
    Counter = 0,
    Gauge = 1,
    Summary = 2,
    Untyped = 3,
    Histogram = 4,
}

impl From<MetricKind> for MetricType {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricType::Counter,
            MetricKind::Gauge => MetricType::Gauge,
            MetricKind::Summary => MetricType::Summary,
            MetricKind::Untyped => MetricType::Untyped,
            MetricKind::Histogram => MetricType::Histogram,
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoMetricFamily {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub help: Option<String>,
    #[prost(enumeration = "MetricType", optional, tag = "3")]
    pub r#type: Option<i32>,
    #[prost(message, repeated, tag = "4")]
    pub metric: Vec<Metric>,
}

/// Converts a family to its protobuf message.
pub fn to_message(family: &MetricFamily) -> Result<ProtoMetricFamily, EncodeError> {
    let mut metrics = Vec::with_capacity(family.samples.len());

    for sample in &family.samples {
        if !sample.value.fits(family.kind) {
            return Err(EncodeError::KindMismatch {
                family: family.name.clone(),
                kind: family.kind,
            });
        }

        let mut metric = Metric {
            label: sample
                .labels
                .iter()
                .map(|(name, value)| LabelPair {
                    name: Some(name.clone()),
                    value: Some(value.clone()),
                })
                .collect(),
            timestamp_ms: sample.timestamp_ms,
            ..Default::default()
        };

        match (&sample.value, family.kind) {
            (SampleValue::Scalar(v), MetricKind::Counter) => {
                metric.counter = Some(Counter { value: Some(*v) });
            }
            (SampleValue::Scalar(v), MetricKind::Gauge) => {
                metric.gauge = Some(Gauge { value: Some(*v) });
            }
            (SampleValue::Scalar(v), _) => {
                metric.untyped = Some(Untyped { value: Some(*v) });
            }
            (
                SampleValue::Histogram {
                    buckets,
                    sum,
                    count,
                },
                _,
            ) => {
                metric.histogram = Some(Histogram {
                    sample_count: Some(*count as u64),
                    sample_sum: Some(*sum),
                    bucket: buckets
                        .iter()
                        .map(|b| Bucket {
                            cumulative_count: Some(b.cumulative_count as u64),
                            upper_bound: Some(b.upper_bound),
                        })
                        .collect(),
                });
            }
            (
                SampleValue::Summary {
                    quantiles,
                    sum,
                    count,
                },
                _,
            ) => {
                metric.summary = Some(Summary {
                    sample_count: Some(*count as u64),
                    sample_sum: Some(*sum),
                    quantile: quantiles
                        .iter()
                        .map(|q| Quantile {
                            quantile: Some(q.quantile),
                            value: Some(q.value),
                        })
                        .collect(),
                });
            }
        }

        metrics.push(metric);
    }

    Ok(ProtoMetricFamily {
        name: Some(family.name.clone()),
        help: family.help.clone(),
        r#type: Some(MetricType::from(family.kind) as i32),
        metric: metrics,
    })
}

/// Writes one family as a length-delimited protobuf message.
pub fn encode(family: &MetricFamily, out: &mut impl Write) -> Result<(), EncodeError> {
    let message = to_message(family)?;
    let mut buf = Vec::with_capacity(message.encoded_len() + 10);
    message.encode_length_delimited(&mut buf)?;
    out.write_all(&buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Bucket as ModelBucket, Sample};

    #[test]
    fn test_encode_is_length_delimited() {
        let family = MetricFamily::new("prom_proxy_scrape_count", MetricKind::Counter)
            .with_help("Scape count.")
            .with_sample(Sample::scalar(vec![], 7.0));

        let mut out = Vec::new();
        encode(&family, &mut out).unwrap();

        let decoded = ProtoMetricFamily::decode_length_delimited(out.as_slice()).unwrap();
        assert_eq!(decoded.name.as_deref(), Some("prom_proxy_scrape_count"));
        assert_eq!(decoded.help.as_deref(), Some("Scape count."));
        assert_eq!(decoded.r#type, Some(MetricType::Counter as i32));
        assert_eq!(decoded.metric.len(), 1);
        assert_eq!(decoded.metric[0].counter.as_ref().unwrap().value, Some(7.0));
    }

    #[test]
    fn test_histogram_message() {
        let family = MetricFamily::new("latency", MetricKind::Histogram).with_sample(Sample {
            labels: vec![("sandbox".into(), "abc".into())],
            value: SampleValue::Histogram {
                buckets: vec![
                    ModelBucket {
                        upper_bound: 1.0,
                        cumulative_count: 2.0,
                    },
                    ModelBucket {
                        upper_bound: f64::INFINITY,
                        cumulative_count: 5.0,
                    },
                ],
                sum: 9.5,
                count: 5.0,
            },
            timestamp_ms: Some(42),
        });

        let message = to_message(&family).unwrap();
        let metric = &message.metric[0];
        assert_eq!(metric.label[0].name.as_deref(), Some("sandbox"));
        assert_eq!(metric.timestamp_ms, Some(42));

        let histogram = metric.histogram.as_ref().unwrap();
        assert_eq!(histogram.sample_count, Some(5));
        assert_eq!(histogram.bucket.len(), 2);
        assert_eq!(histogram.bucket[0].cumulative_count, Some(2));
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let family = MetricFamily::new("mixed", MetricKind::Histogram)
            .with_sample(Sample::scalar(vec![], 1.0));
        assert!(matches!(
            to_message(&family),
            Err(EncodeError::KindMismatch { .. })
        ));
    }
}
