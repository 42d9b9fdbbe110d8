//! Series selectors: `metric_name{label="v", other!="w", path=~"re"}`.

use regex::Regex;

use pulsegrid_exposition::text::{is_valid_label_name, is_valid_metric_name};

use crate::engine::QueryError;

/// Label match operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Eq,
    Ne,
    Re,
    NotRe,
}

/// One label condition.
#[derive(Debug, Clone)]
pub struct Matcher {
    pub label: String,
    pub op: MatchOp,
    pub value: String,
    /// Compiled for `Re`/`NotRe`, anchored to the full value.
    regex: Option<Regex>,
}

impl Matcher {
    fn new(label: String, op: MatchOp, value: String) -> Result<Self, QueryError> {
        let regex = match op {
            MatchOp::Re | MatchOp::NotRe => {
                let compiled = Regex::new(&format!("^(?:{value})$"))
                    .map_err(|e| QueryError::Parse(format!("invalid regex {value:?}: {e}")))?;
                Some(compiled)
            }
            MatchOp::Eq | MatchOp::Ne => None,
        };
        Ok(Self {
            label,
            op,
            value,
            regex,
        })
    }

    /// Whether a label value satisfies this matcher. An absent label
    /// matches as the empty string.
    pub fn matches(&self, value: &str) -> bool {
        match (self.op, &self.regex) {
            (MatchOp::Eq, _) => value == self.value,
            (MatchOp::Ne, _) => value != self.value,
            (MatchOp::Re, Some(re)) => re.is_match(value),
            (MatchOp::NotRe, Some(re)) => !re.is_match(value),
            // Regex ops always carry a compiled regex.
            (MatchOp::Re | MatchOp::NotRe, None) => false,
        }
    }
}

/// A parsed series selector.
#[derive(Debug, Clone)]
pub struct Selector {
    pub metric: String,
    pub matchers: Vec<Matcher>,
}

impl Selector {
    /// Parse a selector expression. Errors carry position and reason.
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(QueryError::Parse("empty query".to_string()));
        }

        let (metric, rest) = match input.find('{') {
            Some(brace) => (&input[..brace], &input[brace + 1..]),
            None => (input, ""),
        };

        if !is_valid_metric_name(metric) {
            return Err(QueryError::Parse(format!(
                "invalid metric name {metric:?}"
            )));
        }

        let mut matchers = Vec::new();
        if !rest.is_empty() || input.contains('{') {
            let rest = parse_matchers(rest, &mut matchers)?;
            if !rest.trim().is_empty() {
                return Err(QueryError::Parse(format!(
                    "unexpected trailing input {:?}",
                    rest.trim()
                )));
            }
        }

        Ok(Self {
            metric: metric.to_string(),
            matchers,
        })
    }

    /// Whether a series' label set satisfies every matcher.
    pub fn matches(&self, labels: &[(String, String)]) -> bool {
        self.matchers.iter().all(|m| {
            let value = labels
                .iter()
                .find(|(k, _)| *k == m.label)
                .map(|(_, v)| v.as_str())
                .unwrap_or("");
            m.matches(value)
        })
    }
}

/// Parse the matcher list after the opening brace. Returns the remainder
/// after the closing brace.
fn parse_matchers<'a>(s: &'a str, out: &mut Vec<Matcher>) -> Result<&'a str, QueryError> {
    let mut rest = s.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix('}') {
            return Ok(after);
        }
        if rest.is_empty() {
            return Err(QueryError::Parse("unterminated matcher block".to_string()));
        }

        let op_pos = rest
            .find(['=', '!'])
            .ok_or_else(|| QueryError::Parse("matcher missing operator".to_string()))?;
        let label = rest[..op_pos].trim();
        if !is_valid_label_name(label) {
            return Err(QueryError::Parse(format!("invalid label name {label:?}")));
        }

        let after_label = &rest[op_pos..];
        let (op, after_op) = if let Some(r) = after_label.strip_prefix("=~") {
            (MatchOp::Re, r)
        } else if let Some(r) = after_label.strip_prefix("!~") {
            (MatchOp::NotRe, r)
        } else if let Some(r) = after_label.strip_prefix("!=") {
            (MatchOp::Ne, r)
        } else if let Some(r) = after_label.strip_prefix('=') {
            (MatchOp::Eq, r)
        } else {
            return Err(QueryError::Parse(format!(
                "unknown operator at {after_label:?}"
            )));
        };

        let after_op = after_op.trim_start();
        let after_quote = after_op.strip_prefix('"').ok_or_else(|| {
            QueryError::Parse("matcher value missing opening quote".to_string())
        })?;
        let (value, after_value) = parse_quoted(after_quote)?;

        out.push(Matcher::new(label.to_string(), op, value)?);

        rest = after_value.trim_start();
        if let Some(after_comma) = rest.strip_prefix(',') {
            rest = after_comma.trim_start();
        } else if !rest.starts_with('}') {
            return Err(QueryError::Parse(
                "expected ',' or '}' after matcher".to_string(),
            ));
        }
    }
}

/// Consume an escaped value up to the closing quote.
fn parse_quoted(s: &str) -> Result<(String, &str), QueryError> {
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
                    return Err(QueryError::Parse(format!("unknown escape '\\{other}'")));
                }
                None => return Err(QueryError::Parse("dangling escape".to_string())),
            },
            _ => value.push(c),
        }
    }
    Err(QueryError::Parse("unterminated matcher value".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn bare_metric_name() {
        let sel = Selector::parse("process_resident_memory_bytes").unwrap();
        assert_eq!(sel.metric, "process_resident_memory_bytes");
        assert!(sel.matchers.is_empty());
        assert!(sel.matches(&labels(&[("job", "node")])));
    }

    #[test]
    fn equality_matcher() {
        let sel = Selector::parse(r#"up{job="node"}"#).unwrap();
        assert!(sel.matches(&labels(&[("job", "node"), ("instance", "a:1")])));
        assert!(!sel.matches(&labels(&[("job", "other")])));
    }

    #[test]
    fn multiple_matchers_all_required() {
        let sel = Selector::parse(r#"up{job="node", instance="a:1"}"#).unwrap();
        assert!(sel.matches(&labels(&[("job", "node"), ("instance", "a:1")])));
        assert!(!sel.matches(&labels(&[("job", "node"), ("instance", "b:2")])));
    }

    #[test]
    fn negative_matcher() {
        let sel = Selector::parse(r#"up{job!="node"}"#).unwrap();
        assert!(!sel.matches(&labels(&[("job", "node")])));
        assert!(sel.matches(&labels(&[("job", "other")])));
        // Absent label is the empty string, which != "node".
        assert!(sel.matches(&labels(&[])));
    }

    #[test]
    fn regex_matcher_is_anchored() {
        let sel = Selector::parse(r#"up{instance=~"app.*"}"#).unwrap();
        assert!(sel.matches(&labels(&[("instance", "app:8000")])));
        assert!(!sel.matches(&labels(&[("instance", "myapp:8000")])));
    }

    #[test]
    fn negative_regex_matcher() {
        let sel = Selector::parse(r#"up{job!~"node|edge"}"#).unwrap();
        assert!(!sel.matches(&labels(&[("job", "node")])));
        assert!(!sel.matches(&labels(&[("job", "edge")])));
        assert!(sel.matches(&labels(&[("job", "core")])));
    }

    #[test]
    fn empty_matcher_block_matches_everything() {
        let sel = Selector::parse("up{}").unwrap();
        assert!(sel.matchers.is_empty());
        assert!(sel.matches(&labels(&[("anything", "goes")])));
    }

    #[test]
    fn escaped_value() {
        let sel = Selector::parse(r#"m{path="a\"b"}"#).unwrap();
        assert!(sel.matches(&labels(&[("path", "a\"b")])));
    }

    #[test]
    fn parse_errors_are_descriptive() {
        for (input, needle) in [
            ("", "empty"),
            ("1bad", "invalid metric name"),
            ("m{", "unterminated"),
            (r#"m{job="x""#, "expected ',' or '}'"),
            (r#"m{job=x}"#, "missing opening quote"),
            (r#"m{bad-name="x"}"#, "invalid label name"),
            (r#"m{job=~"["}"#, "invalid regex"),
            (r#"m{job="x"} trailing"#, "trailing"),
        ] {
            let err = Selector::parse(input).unwrap_err().to_string();
            assert!(
                err.contains(needle),
                "input {input:?}: expected {needle:?} in {err:?}"
            );
        }
    }
}
