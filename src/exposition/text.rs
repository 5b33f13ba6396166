//! Text exposition format (version 0.0.4).

use std::collections::BTreeMap;
use std::io::Write;

use ahash::AHashMap as HashMap;

use super::{DecodeError, EncodeError};
use crate::model::{Bucket, MetricFamily, MetricKind, Quantile, Sample, SampleValue};

type Labels = Vec<(String, String)>;

/// Decodes a text exposition payload into families sorted by name.
pub fn decode(body: &[u8]) -> Result<Vec<MetricFamily>, DecodeError> {
    let text = std::str::from_utf8(body)?;
    let mut parser = TextParser::default();

    for (idx, line) in text.lines().enumerate() {
        parser
            .feed(line)
            .map_err(|reason| DecodeError::Syntax {
                line: idx + 1,
                reason,
            })?;
    }

    Ok(parser.finish())
}

/// Role a sample line plays within its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Plain,
    Bucket,
    Quantile,
    Sum,
    Count,
}

struct FamilyBuilder {
    family: MetricFamily,
    typed: bool,
    has_help: bool,
    /// Label set (without `le`/`quantile`) -> index of the grouped sample.
    groups: HashMap<Labels, usize>,
}

impl FamilyBuilder {
    fn new(name: &str) -> Self {
        Self {
            family: MetricFamily::new(name, MetricKind::Untyped),
            typed: false,
            has_help: false,
            groups: HashMap::new(),
        }
    }

    fn grouped_sample(&mut self, labels: Labels) -> &mut Sample {
        let kind = self.family.kind;
        let samples = &mut self.family.samples;
        let mut key = labels.clone();
        key.sort();

        let idx = *self.groups.entry(key).or_insert_with(|| {
            let value = match kind {
                MetricKind::Summary => SampleValue::Summary {
                    quantiles: Vec::new(),
                    sum: 0.0,
                    count: 0.0,
                },
                _ => SampleValue::Histogram {
                    buckets: Vec::new(),
                    sum: 0.0,
                    count: 0.0,
                },
            };
            samples.push(Sample {
                labels,
                value,
                timestamp_ms: None,
            });
            samples.len() - 1
        });

        &mut samples[idx]
    }
}

#[derive(Default)]
struct TextParser {
    families: BTreeMap<String, FamilyBuilder>,
}

impl TextParser {
    fn feed(&mut self, line: &str) -> Result<(), String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        match line.strip_prefix('#') {
            Some(comment) => self.feed_comment(comment),
            None => self.feed_sample(line),
        }
    }

    fn feed_comment(&mut self, comment: &str) -> Result<(), String> {
        let comment = comment.trim_start();
        let (keyword, rest) = match comment.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim_start()),
            None => return Ok(()),
        };

        match keyword {
            "HELP" => {
                let (name, help) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                if name.is_empty() {
                    return Err("HELP line without metric name".into());
                }
                let builder = self
                    .families
                    .entry(name.to_string())
                    .or_insert_with(|| FamilyBuilder::new(name));
                if builder.has_help {
                    return Err(format!("second HELP line for metric name {name}"));
                }
                builder.has_help = true;
                builder.family.help = Some(unescape_help(help));
                Ok(())
            }
            "TYPE" => {
                let mut tokens = rest.split_whitespace();
                let name = tokens
                    .next()
                    .ok_or_else(|| "TYPE line without metric name".to_string())?;
                let keyword = tokens
                    .next()
                    .ok_or_else(|| format!("TYPE line for {name} without a type"))?;
                let kind = MetricKind::from_type_keyword(keyword)
                    .ok_or_else(|| format!("unknown metric type {keyword:?} for {name}"))?;

                let builder = self
                    .families
                    .entry(name.to_string())
                    .or_insert_with(|| FamilyBuilder::new(name));
                if builder.typed {
                    return Err(format!("second TYPE line for metric name {name}"));
                }
                if !builder.family.samples.is_empty() {
                    return Err(format!("TYPE line for {name} after its samples"));
                }
                builder.typed = true;
                builder.family.kind = kind;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn feed_sample(&mut self, line: &str) -> Result<(), String> {
        let parsed = parse_sample_line(line)?;
        let (family_name, role) = self.resolve(&parsed.name);
        let builder = self
            .families
            .entry(family_name.clone())
            .or_insert_with(|| FamilyBuilder::new(&family_name));

        let ParsedLine {
            mut labels,
            value,
            timestamp_ms,
            ..
        } = parsed;

        match role {
            Role::Plain => {
                builder.family.samples.push(Sample {
                    labels,
                    value: SampleValue::Scalar(value),
                    timestamp_ms,
                });
            }
            Role::Bucket => {
                let upper_bound = take_bound(&mut labels, "le", &family_name)?;
                let sample = builder.grouped_sample(labels);
                if let SampleValue::Histogram { buckets, .. } = &mut sample.value {
                    buckets.push(Bucket {
                        upper_bound,
                        cumulative_count: value,
                    });
                }
                sample.timestamp_ms = timestamp_ms.or(sample.timestamp_ms);
            }
            Role::Quantile => {
                let quantile = take_bound(&mut labels, "quantile", &family_name)?;
                let sample = builder.grouped_sample(labels);
                if let SampleValue::Summary { quantiles, .. } = &mut sample.value {
                    quantiles.push(Quantile { quantile, value });
                }
                sample.timestamp_ms = timestamp_ms.or(sample.timestamp_ms);
            }
            Role::Sum | Role::Count => {
                let sample = builder.grouped_sample(labels);
                match &mut sample.value {
                    SampleValue::Histogram { sum, count, .. }
                    | SampleValue::Summary { sum, count, .. } => {
                        if role == Role::Sum {
                            *sum = value;
                        } else {
                            *count = value;
                        }
                    }
                    SampleValue::Scalar(_) => {}
                }
                sample.timestamp_ms = timestamp_ms.or(sample.timestamp_ms);
            }
        }

        Ok(())
    }

    /// Maps a series name onto the family that owns it.
    fn resolve(&self, name: &str) -> (String, Role) {
        if let Some(builder) = self.families.get(name) {
            match builder.family.kind {
                MetricKind::Summary => return (name.to_string(), Role::Quantile),
                // A bare histogram name is not a valid series; let it stand
                // as its own family so the encoder reports the mismatch.
                MetricKind::Histogram => {}
                _ => return (name.to_string(), Role::Plain),
            }
        }

        for (suffix, role) in [
            ("_bucket", Role::Bucket),
            ("_sum", Role::Sum),
            ("_count", Role::Count),
        ] {
            let Some(base) = name.strip_suffix(suffix) else {
                continue;
            };
            let Some(builder) = self.families.get(base) else {
                continue;
            };
            match (builder.family.kind, role) {
                (MetricKind::Histogram, _) => return (base.to_string(), role),
                (MetricKind::Summary, Role::Sum | Role::Count) => {
                    return (base.to_string(), role)
                }
                _ => {}
            }
        }

        (name.to_string(), Role::Plain)
    }

    fn finish(self) -> Vec<MetricFamily> {
        self.families
            .into_values()
            .map(|builder| builder.family)
            .collect()
    }
}

/// Removes the `le`/`quantile` label and parses its value.
fn take_bound(labels: &mut Labels, name: &str, family: &str) -> Result<f64, String> {
    let pos = labels
        .iter()
        .position(|(n, _)| n == name)
        .ok_or_else(|| format!("sample of {family} is missing the {name:?} label"))?;
    let (_, raw) = labels.remove(pos);
    parse_float(&raw).ok_or_else(|| format!("invalid {name} value {raw:?} for {family}"))
}

struct ParsedLine {
    name: String,
    labels: Labels,
    value: f64,
    timestamp_ms: Option<i64>,
}

/// Parses `name[{labels}] value [timestamp]`.
fn parse_sample_line(line: &str) -> Result<ParsedLine, String> {
    let mut cursor = Cursor::new(line);

    let name = cursor.take_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':');
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(format!("invalid metric name in {line:?}"));
    }
    let name = name.to_string();

    cursor.skip_whitespace();
    let labels = if cursor.peek() == Some('{') {
        cursor.bump();
        parse_labels(&mut cursor)?
    } else {
        Vec::new()
    };

    let mut tokens = cursor.rest().split_whitespace();
    let raw_value = tokens
        .next()
        .ok_or_else(|| format!("missing value for {name}"))?;
    let value = parse_float(raw_value)
        .ok_or_else(|| format!("invalid value {raw_value:?} for {name}"))?;

    let timestamp_ms = match tokens.next() {
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| format!("invalid timestamp {raw:?} for {name}"))?,
        ),
        None => None,
    };

    if let Some(extra) = tokens.next() {
        return Err(format!("unexpected trailing token {extra:?} for {name}"));
    }

    Ok(ParsedLine {
        name,
        labels,
        value,
        timestamp_ms,
    })
}

/// Parses label pairs up to and including the closing brace.
fn parse_labels(cursor: &mut Cursor<'_>) -> Result<Labels, String> {
    let mut labels = Vec::new();

    loop {
        cursor.skip_whitespace();
        match cursor.peek() {
            Some('}') => {
                cursor.bump();
                return Ok(labels);
            }
            None => return Err("unterminated label set".into()),
            _ => {}
        }

        let name = cursor.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
        if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(format!("invalid label name near {:?}", cursor.rest()));
        }
        let name = name.to_string();

        cursor.skip_whitespace();
        if cursor.bump() != Some('=') {
            return Err(format!("expected '=' after label {name}"));
        }
        cursor.skip_whitespace();
        if cursor.bump() != Some('"') {
            return Err(format!("expected quoted value for label {name}"));
        }

        let mut value = String::new();
        loop {
            match cursor.bump() {
                Some('"') => break,
                Some('\\') => match cursor.bump() {
                    Some('n') => value.push('\n'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some(other) => {
                        return Err(format!("invalid escape \\{other} in label {name}"))
                    }
                    None => return Err(format!("unterminated value for label {name}")),
                },
                Some(c) => value.push(c),
                None => return Err(format!("unterminated value for label {name}")),
            }
        }
        labels.push((name, value));

        cursor.skip_whitespace();
        match cursor.bump() {
            Some(',') => continue,
            Some('}') => return Ok(labels),
            _ => return Err("expected ',' or '}' in label set".into()),
        }
    }
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let rest = self.rest();
        let len = rest.find(|c: char| !pred(c)).unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn skip_whitespace(&mut self) {
        self.take_while(char::is_whitespace);
    }
}

fn parse_float(raw: &str) -> Option<f64> {
    match raw {
        "NaN" => Some(f64::NAN),
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        _ => raw.parse().ok(),
    }
}

fn unescape_help(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Writes one family in text format.
pub fn encode(family: &MetricFamily, out: &mut impl Write) -> Result<(), EncodeError> {
    let name = &family.name;

    if let Some(help) = &family.help {
        writeln!(out, "# HELP {name} {}", escape_help(help))?;
    }
    writeln!(out, "# TYPE {name} {}", family.kind)?;

    for sample in &family.samples {
        if !sample.value.fits(family.kind) {
            return Err(EncodeError::KindMismatch {
                family: name.clone(),
                kind: family.kind,
            });
        }

        let ts = sample.timestamp_ms;
        match &sample.value {
            SampleValue::Scalar(v) => {
                write_series(out, name, "", &sample.labels, None, *v, ts)?;
            }
            SampleValue::Histogram {
                buckets,
                sum,
                count,
            } => {
                for bucket in buckets {
                    let le = format_float(bucket.upper_bound);
                    write_series(
                        out,
                        name,
                        "_bucket",
                        &sample.labels,
                        Some(("le", &le)),
                        bucket.cumulative_count,
                        ts,
                    )?;
                }
                let has_inf = buckets
                    .last()
                    .is_some_and(|b| b.upper_bound == f64::INFINITY);
                if !has_inf {
                    write_series(
                        out,
                        name,
                        "_bucket",
                        &sample.labels,
                        Some(("le", "+Inf")),
                        *count,
                        ts,
                    )?;
                }
                write_series(out, name, "_sum", &sample.labels, None, *sum, ts)?;
                write_series(out, name, "_count", &sample.labels, None, *count, ts)?;
            }
            SampleValue::Summary {
                quantiles,
                sum,
                count,
            } => {
                for q in quantiles {
                    let quantile = format_float(q.quantile);
                    write_series(
                        out,
                        name,
                        "",
                        &sample.labels,
                        Some(("quantile", &quantile)),
                        q.value,
                        ts,
                    )?;
                }
                write_series(out, name, "_sum", &sample.labels, None, *sum, ts)?;
                write_series(out, name, "_count", &sample.labels, None, *count, ts)?;
            }
        }
    }

    Ok(())
}

fn write_series(
    out: &mut impl Write,
    name: &str,
    suffix: &str,
    labels: &[(String, String)],
    extra: Option<(&str, &str)>,
    value: f64,
    timestamp_ms: Option<i64>,
) -> std::io::Result<()> {
    write!(out, "{name}{suffix}")?;

    if !labels.is_empty() || extra.is_some() {
        out.write_all(b"{")?;
        let pairs = labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(extra);
        for (i, (k, v)) in pairs.enumerate() {
            if i > 0 {
                out.write_all(b",")?;
            }
            write!(out, "{k}=\"{}\"", escape_label_value(v))?;
        }
        out.write_all(b"}")?;
    }

    write!(out, " {}", format_float(value))?;
    if let Some(ts) = timestamp_ms {
        write!(out, " {ts}")?;
    }
    out.write_all(b"\n")
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        v.to_string()
    }
}

fn escape_help(help: &str) -> String {
    help.replace('\\', r"\\").replace('\n', r"\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', r"\\")
        .replace('"', "\\\"")
        .replace('\n', r"\n")
}
