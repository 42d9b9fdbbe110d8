//! Instant and range evaluation over the sample store.

use std::collections::BTreeMap;

use thiserror::Error;

use pulsegrid_store::{MetricStore, SamplePoint, StoreError};

use crate::selector::Selector;
use crate::wire::SeriesResult;

/// Staleness window: how far back an instant evaluation may reach for the
/// most recent sample.
pub const DEFAULT_LOOKBACK_MS: u64 = 5 * 60 * 1000;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("selector parse error: {0}")]
    Parse(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid range: {0}")]
    InvalidRange(String),
}

/// Evaluates selectors against a `MetricStore`.
#[derive(Clone)]
pub struct QueryEngine {
    store: MetricStore,
}

impl QueryEngine {
    pub fn new(store: MetricStore) -> Self {
        Self { store }
    }

    /// Most recent sample per matching series at or before `at_ms`, looking
    /// back at most `lookback_ms`.
    pub fn instant(
        &self,
        expr: &str,
        at_ms: u64,
        lookback_ms: u64,
    ) -> Result<Vec<SeriesResult>, QueryError> {
        let selector = Selector::parse(expr)?;
        let start = at_ms.saturating_sub(lookback_ms);
        let samples = self.store.samples_for_metric(&selector.metric, start, at_ms)?;

        let mut latest: BTreeMap<String, SamplePoint> = BTreeMap::new();
        for sample in samples {
            if !selector.matches(&sample.labels) {
                continue;
            }
            let sig = sample.label_signature();
            match latest.get(&sig) {
                Some(existing) if existing.timestamp_ms >= sample.timestamp_ms => {}
                _ => {
                    latest.insert(sig, sample);
                }
            }
        }

        Ok(latest
            .into_values()
            .map(|s| SeriesResult {
                labels: label_map(&s),
                points: vec![(s.timestamp_ms, s.value)],
            })
            .collect())
    }

    /// All matching samples in `[start_ms, end_ms]`, grouped per series.
    /// With a step, each series is instead evaluated instant-wise at every
    /// step boundary using the default staleness window.
    pub fn range(
        &self,
        expr: &str,
        start_ms: u64,
        end_ms: u64,
        step_ms: Option<u64>,
    ) -> Result<Vec<SeriesResult>, QueryError> {
        if end_ms < start_ms {
            return Err(QueryError::InvalidRange(format!(
                "end {end_ms} precedes start {start_ms}"
            )));
        }
        if step_ms == Some(0) {
            return Err(QueryError::InvalidRange("step must be positive".to_string()));
        }

        let selector = Selector::parse(expr)?;
        // With a step, the first boundary may look back before the range.
        let scan_start = match step_ms {
            Some(_) => start_ms.saturating_sub(DEFAULT_LOOKBACK_MS),
            None => start_ms,
        };
        let samples = self
            .store
            .samples_for_metric(&selector.metric, scan_start, end_ms)?;

        let mut series: BTreeMap<String, (BTreeMap<String, String>, Vec<(u64, f64)>)> =
            BTreeMap::new();
        for sample in samples {
            if !selector.matches(&sample.labels) {
                continue;
            }
            let sig = sample.label_signature();
            let entry = series
                .entry(sig)
                .or_insert_with(|| (label_map(&sample), Vec::new()));
            entry.1.push((sample.timestamp_ms, sample.value));
        }

        let mut results = Vec::with_capacity(series.len());
        for (_, (labels, mut points)) in series {
            points.sort_by_key(|(ts, _)| *ts);
            let points = match step_ms {
                None => {
                    // Raw mode still excludes the pre-range lookback scan.
                    points
                        .into_iter()
                        .filter(|(ts, _)| *ts >= start_ms)
                        .collect()
                }
                Some(step) => step_align(&points, start_ms, end_ms, step),
            };
            if !points.is_empty() {
                results.push(SeriesResult { labels, points });
            }
        }
        Ok(results)
    }
}

/// For each step boundary, the most recent raw point within the staleness
/// window. Boundaries with nothing in reach produce no point.
fn step_align(points: &[(u64, f64)], start_ms: u64, end_ms: u64, step: u64) -> Vec<(u64, f64)> {
    let mut out = Vec::new();
    let mut t = start_ms;
    while t <= end_ms {
        let window_start = t.saturating_sub(DEFAULT_LOOKBACK_MS);
        let mut latest = None;
        for (ts, v) in points {
            if *ts > t {
                break;
            }
            if *ts >= window_start {
                latest = Some(*v);
            }
        }
        if let Some(v) = latest {
            out.push((t, v));
        }
        match t.checked_add(step) {
            Some(next) => t = next,
            None => break,
        }
    }
    out
}

fn label_map(sample: &SamplePoint) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = sample.labels.iter().cloned().collect();
    map.insert("__name__".to_string(), sample.metric.clone());
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> MetricStore {
        let store = MetricStore::open_in_memory().unwrap();
        let mut samples = Vec::new();
        for (job, base) in [("node", 10.0), ("edge", 100.0)] {
            for i in 0..5u64 {
                samples.push(SamplePoint::new(
                    "requests_total",
                    vec![
                        ("job".to_string(), job.to_string()),
                        ("instance".to_string(), format!("{job}:9100")),
                    ],
                    (i + 1) * 1000,
                    base + i as f64,
                ));
            }
        }
        store.append_samples(&samples).unwrap();
        store
    }

    #[test]
    fn instant_returns_latest_per_series() {
        let engine = QueryEngine::new(seeded_store());
        let result = engine
            .instant("requests_total", 10_000, DEFAULT_LOOKBACK_MS)
            .unwrap();

        assert_eq!(result.len(), 2);
        for series in &result {
            assert_eq!(series.points.len(), 1);
            assert_eq!(series.points[0].0, 5000);
        }
    }

    #[test]
    fn instant_respects_matchers() {
        let engine = QueryEngine::new(seeded_store());
        let result = engine
            .instant(r#"requests_total{job="node"}"#, 10_000, DEFAULT_LOOKBACK_MS)
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].labels.get("job").unwrap(), "node");
        assert_eq!(result[0].points[0].1, 14.0);
    }

    #[test]
    fn instant_excludes_stale_series() {
        let engine = QueryEngine::new(seeded_store());
        // Evaluation time far beyond every sample + lookback.
        let result = engine
            .instant("requests_total", 10_000_000, DEFAULT_LOOKBACK_MS)
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn instant_on_unknown_metric_is_empty() {
        let engine = QueryEngine::new(seeded_store());
        let result = engine
            .instant("no_such_metric", 10_000, DEFAULT_LOOKBACK_MS)
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn instant_includes_metric_name_label() {
        let engine = QueryEngine::new(seeded_store());
        let result = engine
            .instant(r#"requests_total{job="node"}"#, 10_000, DEFAULT_LOOKBACK_MS)
            .unwrap();
        assert_eq!(
            result[0].labels.get("__name__").unwrap(),
            "requests_total"
        );
    }

    #[test]
    fn range_raw_returns_window_points_in_order() {
        let engine = QueryEngine::new(seeded_store());
        let result = engine
            .range(r#"requests_total{job="edge"}"#, 2000, 4000, None)
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(
            result[0].points,
            vec![(2000, 101.0), (3000, 102.0), (4000, 103.0)]
        );
    }

    #[test]
    fn range_with_step_evaluates_boundaries() {
        let engine = QueryEngine::new(seeded_store());
        let result = engine
            .range(r#"requests_total{job="node"}"#, 1000, 5000, Some(2000))
            .unwrap();

        assert_eq!(result.len(), 1);
        // Boundaries 1000, 3000, 5000 pick the latest raw point at or
        // before each.
        assert_eq!(
            result[0].points,
            vec![(1000, 10.0), (3000, 12.0), (5000, 14.0)]
        );
    }

    #[test]
    fn range_step_carries_last_value_forward() {
        let store = MetricStore::open_in_memory().unwrap();
        store
            .append_samples(&[SamplePoint::new("m", vec![], 1000, 7.0)])
            .unwrap();
        let engine = QueryEngine::new(store);

        let result = engine.range("m", 1000, 5000, Some(2000)).unwrap();
        // One raw point carried across later boundaries within lookback.
        assert_eq!(result[0].points, vec![(1000, 7.0), (3000, 7.0), (5000, 7.0)]);
    }

    #[test]
    fn range_rejects_inverted_window_and_zero_step() {
        let engine = QueryEngine::new(seeded_store());
        assert!(matches!(
            engine.range("m", 5000, 1000, None),
            Err(QueryError::InvalidRange(_))
        ));
        assert!(matches!(
            engine.range("m", 1000, 5000, Some(0)),
            Err(QueryError::InvalidRange(_))
        ));
    }

    #[test]
    fn range_propagates_parse_errors() {
        let engine = QueryEngine::new(seeded_store());
        assert!(matches!(
            engine.range("1bad", 0, 1000, None),
            Err(QueryError::Parse(_))
        ));
    }

    #[test]
    fn regex_selector_spans_series() {
        let engine = QueryEngine::new(seeded_store());
        let result = engine
            .instant(
                r#"requests_total{instance=~".*:9100"}"#,
                10_000,
                DEFAULT_LOOKBACK_MS,
            )
            .unwrap();
        assert_eq!(result.len(), 2);
    }
}
