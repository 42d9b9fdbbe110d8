//! The text exposition format.
//!
//! Line-oriented: each metric family carries optional `# HELP` / `# TYPE`
//! comment lines followed by `metric_name{label="value",...} value` sample
//! lines. Parsing is all-or-nothing: one malformed line fails the body.

use std::collections::HashMap;

use thiserror::Error;

/// Metric family kind as declared by a `# TYPE` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
            MetricKind::Untyped => "untyped",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "counter" => Some(MetricKind::Counter),
            "gauge" => Some(MetricKind::Gauge),
            "histogram" => Some(MetricKind::Histogram),
            "summary" => Some(MetricKind::Summary),
            "untyped" => Some(MetricKind::Untyped),
            _ => None,
        }
    }
}

/// One sample line: a label set and a value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// The sample's own name (for histograms this differs from the family
    /// name: `name_bucket`, `name_sum`, `name_count`).
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
    /// Timestamp from the exposition line, when present. The collector
    /// tags samples with the scrape time instead.
    pub timestamp_ms: Option<i64>,
}

/// A named family of samples with optional HELP/TYPE metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: Option<String>,
    pub kind: MetricKind,
    pub samples: Vec<Sample>,
}

/// Parse failure: the offending line and why.
#[derive(Debug, Error)]
#[error("exposition parse error at line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

fn err(line: usize, message: impl Into<String>) -> ParseError {
    ParseError {
        line,
        message: message.into(),
    }
}

// ── Rendering ──────────────────────────────────────────────────────

/// Render metric families into the text exposition format.
pub fn render(families: &[MetricFamily]) -> String {
    let mut out = String::new();
    for family in families {
        if let Some(help) = &family.help {
            out.push_str(&format!(
                "# HELP {} {}\n",
                family.name,
                escape_help(help)
            ));
        }
        if family.kind != MetricKind::Untyped {
            out.push_str(&format!("# TYPE {} {}\n", family.name, family.kind.as_str()));
        }
        for sample in &family.samples {
            out.push_str(&sample.name);
            if !sample.labels.is_empty() {
                out.push('{');
                for (i, (k, v)) in sample.labels.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&format!("{k}=\"{}\"", escape_label_value(v)));
                }
                out.push('}');
            }
            out.push(' ');
            out.push_str(&format_value(sample.value));
            if let Some(ts) = sample.timestamp_ms {
                out.push_str(&format!(" {ts}"));
            }
            out.push('\n');
        }
    }
    out
}

fn escape_help(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{v}")
    }
}

// ── Parsing ────────────────────────────────────────────────────────

/// Parse a text exposition body into metric families.
///
/// Family order follows first appearance. A malformed line fails the whole
/// body; no partial result is returned.
pub fn parse(body: &str) -> Result<Vec<MetricFamily>, ParseError> {
    let mut families: Vec<MetricFamily> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (line_no, raw) in body.lines().enumerate() {
        let line_no = line_no + 1;
        let line = raw.trim_end();
        if line.trim().is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('#') {
            let rest = rest.trim_start();
            if let Some(spec) = rest.strip_prefix("HELP ") {
                let (name, help) = spec
                    .split_once(' ')
                    .map(|(n, h)| (n, Some(h)))
                    .unwrap_or((spec, None));
                if !is_valid_metric_name(name) {
                    return Err(err(line_no, format!("invalid metric name {name:?} in HELP")));
                }
                let fam = family_entry(&mut families, &mut index, name);
                fam.help = help.map(unescape_help);
            } else if let Some(spec) = rest.strip_prefix("TYPE ") {
                let (name, kind_str) = spec
                    .split_once(' ')
                    .ok_or_else(|| err(line_no, "TYPE line missing kind"))?;
                if !is_valid_metric_name(name) {
                    return Err(err(line_no, format!("invalid metric name {name:?} in TYPE")));
                }
                let kind = MetricKind::from_str(kind_str.trim())
                    .ok_or_else(|| err(line_no, format!("unknown metric kind {kind_str:?}")))?;
                family_entry(&mut families, &mut index, name).kind = kind;
            }
            // Other comments are ignored.
            continue;
        }

        let sample = parse_sample_line(line, line_no)?;
        let family_name = family_name_for(&sample.name, &index, &families);
        let fam = family_entry(&mut families, &mut index, &family_name);
        fam.samples.push(sample);
    }

    Ok(families)
}

fn family_entry<'a>(
    families: &'a mut Vec<MetricFamily>,
    index: &mut HashMap<String, usize>,
    name: &str,
) -> &'a mut MetricFamily {
    let idx = *index.entry(name.to_string()).or_insert_with(|| {
        families.push(MetricFamily {
            name: name.to_string(),
            help: None,
            kind: MetricKind::Untyped,
            samples: Vec::new(),
        });
        families.len() - 1
    });
    &mut families[idx]
}

/// Histogram/summary component series (`_bucket`, `_sum`, `_count`) attach
/// to their declared base family; anything else is its own family.
fn family_name_for(
    sample_name: &str,
    index: &HashMap<String, usize>,
    families: &[MetricFamily],
) -> String {
    for suffix in ["_bucket", "_sum", "_count"] {
        if let Some(base) = sample_name.strip_suffix(suffix) {
            if let Some(&idx) = index.get(base) {
                if matches!(
                    families[idx].kind,
                    MetricKind::Histogram | MetricKind::Summary
                ) {
                    return base.to_string();
                }
            }
        }
    }
    sample_name.to_string()
}

fn parse_sample_line(line: &str, line_no: usize) -> Result<Sample, ParseError> {
    // Metric name runs up to the first '{' or whitespace.
    let name_end = line
        .char_indices()
        .find(|(_, c)| *c == '{' || c.is_whitespace())
        .map(|(i, _)| i)
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if !is_valid_metric_name(name) {
        return Err(err(line_no, format!("invalid metric name {name:?}")));
    }

    let rest = &line[name_end..];
    let (labels, rest) = if let Some(after_brace) = rest.strip_prefix('{') {
        parse_labels(after_brace, line_no)?
    } else {
        (Vec::new(), rest)
    };

    let mut fields = rest.split_whitespace();
    let value_str = fields
        .next()
        .ok_or_else(|| err(line_no, "sample line missing value"))?;
    let value = parse_value(value_str)
        .ok_or_else(|| err(line_no, format!("invalid sample value {value_str:?}")))?;

    let timestamp_ms = match fields.next() {
        Some(ts) => Some(
            ts.parse::<i64>()
                .map_err(|_| err(line_no, format!("invalid timestamp {ts:?}")))?,
        ),
        None => None,
    };
    if fields.next().is_some() {
        return Err(err(line_no, "trailing garbage after timestamp"));
    }

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
        timestamp_ms,
    })
}

/// Parse `key="value",...}` starting just after the opening brace.
/// Returns the labels and the remainder after the closing brace.
fn parse_labels<'a>(
    s: &'a str,
    line_no: usize,
) -> Result<(Vec<(String, String)>, &'a str), ParseError> {
    let mut labels = Vec::new();
    let mut rest = s.trim_start();

    loop {
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let eq = rest
            .find('=')
            .ok_or_else(|| err(line_no, "label missing '='"))?;
        let key = rest[..eq].trim();
        if !is_valid_label_name(key) {
            return Err(err(line_no, format!("invalid label name {key:?}")));
        }

        let after_eq = rest[eq + 1..].trim_start();
        let after_quote = after_eq
            .strip_prefix('"')
            .ok_or_else(|| err(line_no, "label value missing opening quote"))?;

        let (value, after_value) = parse_quoted_value(after_quote, line_no)?;
        labels.push((key.to_string(), value));

        rest = after_value.trim_start();
        if let Some(after_comma) = rest.strip_prefix(',') {
            rest = after_comma.trim_start();
        } else if !rest.starts_with('}') {
            return Err(err(line_no, "expected ',' or '}' after label value"));
        }
    }
}

/// Consume an escaped label value up to the closing quote. Returns the
/// unescaped value and the remainder after the quote.
fn parse_quoted_value(s: &str, line_no: usize) -> Result<(String, &str), ParseError> {
    let mut value = String::new();
    let mut chars = s.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((value, &s[i + 1..])),
            '\\' => match chars.next() {
                Some((_, '\\')) => value.push('\\'),
                Some((_, '"')) => value.push('"'),
                Some((_, 'n')) => value.push('\n'),
                Some((_, other)) => {
                    return Err(err(line_no, format!("unknown escape '\\{other}'")));
                }
                None => return Err(err(line_no, "dangling escape at end of label value")),
            },
            _ => value.push(c),
        }
    }
    Err(err(line_no, "unterminated label value"))
}

fn parse_value(s: &str) -> Option<f64> {
    match s {
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => s.parse::<f64>().ok(),
    }
}

fn unescape_help(s: &str) -> String {
    s.replace("\\n", "\n").replace("\\\\", "\\")
}

pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gauge_family(name: &str, samples: Vec<Sample>) -> MetricFamily {
        MetricFamily {
            name: name.to_string(),
            help: Some(format!("{name} help text.")),
            kind: MetricKind::Gauge,
            samples,
        }
    }

    fn sample(name: &str, labels: &[(&str, &str)], value: f64) -> Sample {
        Sample {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            value,
            timestamp_ms: None,
        }
    }

    #[test]
    fn render_includes_help_and_type() {
        let fam = gauge_family(
            "process_resident_memory_bytes",
            vec![sample("process_resident_memory_bytes", &[], 12_345_678.0)],
        );
        let out = render(&[fam]);
        assert!(out.contains("# HELP process_resident_memory_bytes"));
        assert!(out.contains("# TYPE process_resident_memory_bytes gauge"));
        assert!(out.contains("process_resident_memory_bytes 12345678\n"));
    }

    #[test]
    fn render_labels_in_declared_order() {
        let fam = gauge_family(
            "up",
            vec![sample("up", &[("job", "node"), ("instance", "app:8000")], 1.0)],
        );
        let out = render(&[fam]);
        assert!(out.contains("up{job=\"node\",instance=\"app:8000\"} 1\n"));
    }

    #[test]
    fn render_escapes_label_values() {
        let fam = gauge_family(
            "weird",
            vec![sample("weird", &[("path", "a\\b\"c\nd")], 1.0)],
        );
        let out = render(&[fam]);
        assert!(out.contains(r#"path="a\\b\"c\nd""#));
    }

    #[test]
    fn render_special_values() {
        let fam = gauge_family(
            "extremes",
            vec![
                sample("extremes", &[("k", "inf")], f64::INFINITY),
                sample("extremes", &[("k", "ninf")], f64::NEG_INFINITY),
            ],
        );
        let out = render(&[fam]);
        assert!(out.contains("} +Inf\n"));
        assert!(out.contains("} -Inf\n"));
    }

    #[test]
    fn parse_simple_body() {
        let body = "\
# HELP http_requests_total Total HTTP requests.
# TYPE http_requests_total counter
http_requests_total{method=\"get\",code=\"200\"} 1027
http_requests_total{method=\"post\",code=\"200\"} 3
";
        let families = parse(body).unwrap();
        assert_eq!(families.len(), 1);
        let fam = &families[0];
        assert_eq!(fam.name, "http_requests_total");
        assert_eq!(fam.kind, MetricKind::Counter);
        assert_eq!(fam.help.as_deref(), Some("Total HTTP requests."));
        assert_eq!(fam.samples.len(), 2);
        assert_eq!(fam.samples[0].value, 1027.0);
        assert_eq!(
            fam.samples[0].labels,
            vec![
                ("method".to_string(), "get".to_string()),
                ("code".to_string(), "200".to_string()),
            ]
        );
    }

    #[test]
    fn parse_bare_sample_without_metadata() {
        let families = parse("process_resident_memory_bytes 12345678\n").unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].kind, MetricKind::Untyped);
        assert_eq!(families[0].samples[0].value, 12_345_678.0);
    }

    #[test]
    fn parse_sample_with_timestamp() {
        let families = parse("boot_seconds 17.5 1712000000000\n").unwrap();
        assert_eq!(families[0].samples[0].timestamp_ms, Some(1_712_000_000_000));
    }

    #[test]
    fn parse_escaped_label_value() {
        let families = parse(r#"m{path="a\\b\"c\nd"} 1"#).unwrap();
        assert_eq!(families[0].samples[0].labels[0].1, "a\\b\"c\nd");
    }

    #[test]
    fn parse_histogram_components_share_family() {
        let body = "\
# TYPE request_duration_seconds histogram
request_duration_seconds_bucket{le=\"0.1\"} 4
request_duration_seconds_bucket{le=\"+Inf\"} 9
request_duration_seconds_sum 1.7
request_duration_seconds_count 9
";
        let families = parse(body).unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, "request_duration_seconds");
        assert_eq!(families[0].samples.len(), 4);
    }

    #[test]
    fn parse_count_without_declared_histogram_is_own_family() {
        let families = parse("things_count 3\n").unwrap();
        assert_eq!(families[0].name, "things_count");
    }

    #[test]
    fn parse_special_values() {
        let families = parse("m{k=\"a\"} +Inf\nm{k=\"b\"} NaN\n").unwrap();
        assert_eq!(families[0].samples[0].value, f64::INFINITY);
        assert!(families[0].samples[1].value.is_nan());
    }

    #[test]
    fn parse_rejects_malformed_lines() {
        for bad in [
            "no value here",
            "1leading_digit 2",
            "m{unclosed=\"v\" 1",
            "m{k=v} 1",
            "m{k=\"v\"} notanumber",
            "m 1 2 3",
            "m{k=\"dangling\\",
        ] {
            let result = parse(bad);
            assert!(result.is_err(), "expected parse failure for {bad:?}");
        }
    }

    #[test]
    fn parse_error_carries_line_number() {
        let body = "ok_metric 1\nbroken{ 2\n";
        let e = parse(body).unwrap_err();
        assert_eq!(e.line, 2);
    }

    #[test]
    fn parse_ignores_plain_comments_and_blank_lines() {
        let body = "\n# just a comment\nm 1\n\n";
        let families = parse(body).unwrap();
        assert_eq!(families.len(), 1);
    }

    #[test]
    fn round_trip_preserves_families() {
        let body = "\
# HELP up Whether the target's last scrape succeeded.
# TYPE up gauge
up{job=\"node\",instance=\"app:8000\"} 1
";
        let families = parse(body).unwrap();
        let rendered = render(&families);
        let reparsed = parse(&rendered).unwrap();
        assert_eq!(families, reparsed);
    }

    #[test]
    fn metric_name_validation() {
        assert!(is_valid_metric_name("http_requests_total"));
        assert!(is_valid_metric_name("ns:subsystem:metric"));
        assert!(is_valid_metric_name("_private"));
        assert!(!is_valid_metric_name("1starts_with_digit"));
        assert!(!is_valid_metric_name("has-dash"));
        assert!(!is_valid_metric_name(""));
    }

    #[test]
    fn label_name_validation() {
        assert!(is_valid_label_name("job"));
        assert!(!is_valid_label_name("le\""));
        assert!(!is_valid_label_name(""));
    }
}
