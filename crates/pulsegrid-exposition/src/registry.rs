//! In-process metrics registry.
//!
//! Counters and gauges are f64 values stored as atomic bit patterns;
//! histograms carry fixed bucket bounds with atomic per-bucket counts.
//! Recording never blocks on application logic and never panics, so the
//! registry stays serviceable whatever state the application is in.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::warn;

use crate::process;
use crate::text::{MetricFamily, MetricKind, Sample};

/// Atomic f64 cell.
struct Value(AtomicU64);

impl Value {
    fn new(v: f64) -> Self {
        Value(AtomicU64::new(v.to_bits()))
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn set(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }

    fn add(&self, delta: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

struct HistogramCell {
    bounds: Vec<f64>,
    /// One count per bound, plus the implicit +Inf bucket at the end.
    buckets: Vec<AtomicU64>,
    sum: Value,
    count: AtomicU64,
}

impl HistogramCell {
    fn new(bounds: &[f64]) -> Self {
        let buckets = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds: bounds.to_vec(),
            buckets,
            sum: Value::new(0.0),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, v: f64) {
        for (i, bound) in self.bounds.iter().enumerate() {
            if v <= *bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        // +Inf bucket counts everything.
        self.buckets[self.bounds.len()].fetch_add(1, Ordering::Relaxed);
        self.sum.add(v);
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

enum Cell {
    Scalar(Value),
    Histogram(HistogramCell),
}

struct Series {
    labels: Vec<(String, String)>,
    cell: Cell,
}

struct Family {
    help: Option<String>,
    kind: MetricKind,
    /// Default histogram bucket bounds for this family.
    bounds: Vec<f64>,
    /// Series keyed by canonical label signature.
    series: BTreeMap<String, Series>,
}

/// Registry of counters, gauges, and histograms for one process.
#[derive(Default)]
pub struct MetricsRegistry {
    families: RwLock<BTreeMap<String, Family>>,
}

/// Default request-duration style bucket bounds, in seconds.
pub const DEFAULT_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

fn label_signature(labels: &[(String, String)]) -> String {
    let mut parts: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    parts.sort();
    parts.join(",")
}

fn owned_labels(labels: &[(&str, &str)]) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    out.sort();
    out
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a counter family.
    pub fn register_counter(&self, name: &str, help: &str) {
        self.register(name, help, MetricKind::Counter, Vec::new());
    }

    /// Declare a gauge family.
    pub fn register_gauge(&self, name: &str, help: &str) {
        self.register(name, help, MetricKind::Gauge, Vec::new());
    }

    /// Declare a histogram family with the given bucket bounds.
    pub fn register_histogram(&self, name: &str, help: &str, bounds: &[f64]) {
        self.register(name, help, MetricKind::Histogram, bounds.to_vec());
    }

    fn register(&self, name: &str, help: &str, kind: MetricKind, bounds: Vec<f64>) {
        let mut families = self.write();
        families.entry(name.to_string()).or_insert(Family {
            help: Some(help.to_string()),
            kind,
            bounds,
            series: BTreeMap::new(),
        });
    }

    /// Add `delta` to a counter series. Negative deltas are dropped:
    /// counters are monotonic.
    pub fn inc_counter(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        if delta < 0.0 {
            warn!(metric = name, delta, "negative counter increment dropped");
            return;
        }
        self.with_scalar(name, labels, MetricKind::Counter, |v| v.add(delta));
    }

    /// Set a gauge series to `value`.
    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.with_scalar(name, labels, MetricKind::Gauge, |v| v.set(value));
    }

    /// Record one observation into a histogram series.
    pub fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let labels = owned_labels(labels);
        let sig = label_signature(&labels);
        let mut families = self.write();
        let family = families.entry(name.to_string()).or_insert(Family {
            help: None,
            kind: MetricKind::Histogram,
            bounds: DEFAULT_BUCKETS.to_vec(),
            series: BTreeMap::new(),
        });
        let bounds = family.bounds.clone();
        let series = family.series.entry(sig).or_insert_with(|| Series {
            labels,
            cell: Cell::Histogram(HistogramCell::new(&bounds)),
        });
        match &series.cell {
            Cell::Histogram(h) => h.observe(value),
            Cell::Scalar(_) => {
                warn!(metric = name, "observe() on a scalar series ignored");
            }
        }
    }

    fn with_scalar(
        &self,
        name: &str,
        labels: &[(&str, &str)],
        default_kind: MetricKind,
        f: impl FnOnce(&Value),
    ) {
        let labels = owned_labels(labels);
        let sig = label_signature(&labels);
        let mut families = self.write();
        let family = families.entry(name.to_string()).or_insert(Family {
            help: None,
            kind: default_kind,
            bounds: Vec::new(),
            series: BTreeMap::new(),
        });
        let series = family.series.entry(sig).or_insert_with(|| Series {
            labels,
            cell: Cell::Scalar(Value::new(0.0)),
        });
        match &series.cell {
            Cell::Scalar(v) => f(v),
            Cell::Histogram(_) => {
                warn!(metric = name, "scalar write to a histogram series ignored");
            }
        }
    }

    /// Current value of a scalar series, if it exists.
    pub fn scalar_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let sig = label_signature(&owned_labels(labels));
        let families = self.read();
        match &families.get(name)?.series.get(&sig)?.cell {
            Cell::Scalar(v) => Some(v.get()),
            Cell::Histogram(_) => None,
        }
    }

    /// Register the process self-metrics families.
    pub fn register_process_metrics(&self) {
        self.register_gauge(
            "process_resident_memory_bytes",
            "Resident memory size in bytes.",
        );
    }

    /// Refresh process self-metrics from the host. Called at render time so
    /// the exposed values are a point-in-time snapshot.
    pub fn refresh_process_metrics(&self) {
        if let Some(rss) = process::resident_memory_bytes() {
            self.set_gauge("process_resident_memory_bytes", &[], rss as f64);
        }
    }

    /// Snapshot all families, histogram series expanded into their
    /// `_bucket` / `_sum` / `_count` components.
    pub fn snapshot(&self) -> Vec<MetricFamily> {
        let families = self.read();
        let mut out = Vec::with_capacity(families.len());

        for (name, family) in families.iter() {
            let mut samples = Vec::new();
            for series in family.series.values() {
                match &series.cell {
                    Cell::Scalar(v) => samples.push(Sample {
                        name: name.clone(),
                        labels: series.labels.clone(),
                        value: v.get(),
                        timestamp_ms: None,
                    }),
                    Cell::Histogram(h) => {
                        let cumulative_labels = |le: String| {
                            let mut labels = series.labels.clone();
                            labels.push(("le".to_string(), le));
                            labels
                        };
                        for (i, bound) in h.bounds.iter().enumerate() {
                            samples.push(Sample {
                                name: format!("{name}_bucket"),
                                labels: cumulative_labels(format!("{bound}")),
                                value: h.buckets[i].load(Ordering::Relaxed) as f64,
                                timestamp_ms: None,
                            });
                        }
                        samples.push(Sample {
                            name: format!("{name}_bucket"),
                            labels: cumulative_labels("+Inf".to_string()),
                            value: h.buckets[h.bounds.len()].load(Ordering::Relaxed) as f64,
                            timestamp_ms: None,
                        });
                        samples.push(Sample {
                            name: format!("{name}_sum"),
                            labels: series.labels.clone(),
                            value: h.sum.get(),
                            timestamp_ms: None,
                        });
                        samples.push(Sample {
                            name: format!("{name}_count"),
                            labels: series.labels.clone(),
                            value: h.count.load(Ordering::Relaxed) as f64,
                            timestamp_ms: None,
                        });
                    }
                }
            }
            out.push(MetricFamily {
                name: name.clone(),
                help: family.help.clone(),
                kind: family.kind,
                samples,
            });
        }
        out
    }

    /// Render the registry in the text exposition format.
    pub fn render(&self) -> String {
        crate::text::render(&self.snapshot())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Family>> {
        self.families.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Family>> {
        self.families.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let registry = MetricsRegistry::new();
        registry.register_counter("requests_total", "Total requests.");
        registry.inc_counter("requests_total", &[("code", "200")], 1.0);
        registry.inc_counter("requests_total", &[("code", "200")], 2.0);
        registry.inc_counter("requests_total", &[("code", "500")], 1.0);

        assert_eq!(
            registry.scalar_value("requests_total", &[("code", "200")]),
            Some(3.0)
        );
        assert_eq!(
            registry.scalar_value("requests_total", &[("code", "500")]),
            Some(1.0)
        );
    }

    #[test]
    fn negative_counter_increment_dropped() {
        let registry = MetricsRegistry::new();
        registry.inc_counter("c", &[], 5.0);
        registry.inc_counter("c", &[], -3.0);
        assert_eq!(registry.scalar_value("c", &[]), Some(5.0));
    }

    #[test]
    fn gauge_sets_latest_value() {
        let registry = MetricsRegistry::new();
        registry.set_gauge("temperature", &[], 20.5);
        registry.set_gauge("temperature", &[], 19.0);
        assert_eq!(registry.scalar_value("temperature", &[]), Some(19.0));
    }

    #[test]
    fn label_order_does_not_split_series() {
        let registry = MetricsRegistry::new();
        registry.inc_counter("c", &[("a", "1"), ("b", "2")], 1.0);
        registry.inc_counter("c", &[("b", "2"), ("a", "1")], 1.0);
        assert_eq!(registry.scalar_value("c", &[("a", "1"), ("b", "2")]), Some(2.0));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let registry = MetricsRegistry::new();
        registry.register_histogram("latency_seconds", "Request latency.", &[0.1, 0.5, 1.0]);
        registry.observe("latency_seconds", &[], 0.05);
        registry.observe("latency_seconds", &[], 0.3);
        registry.observe("latency_seconds", &[], 2.0);

        let families = registry.snapshot();
        let fam = families
            .iter()
            .find(|f| f.name == "latency_seconds")
            .unwrap();

        let bucket = |le: &str| {
            fam.samples
                .iter()
                .find(|s| {
                    s.name == "latency_seconds_bucket"
                        && s.labels.iter().any(|(k, v)| k == "le" && v == le)
                })
                .map(|s| s.value)
                .unwrap()
        };

        assert_eq!(bucket("0.1"), 1.0);
        assert_eq!(bucket("0.5"), 2.0);
        assert_eq!(bucket("1"), 2.0);
        assert_eq!(bucket("+Inf"), 3.0);

        let count = fam
            .samples
            .iter()
            .find(|s| s.name == "latency_seconds_count")
            .unwrap();
        assert_eq!(count.value, 3.0);
        let sum = fam
            .samples
            .iter()
            .find(|s| s.name == "latency_seconds_sum")
            .unwrap();
        assert!((sum.value - 2.35).abs() < 1e-9);
    }

    #[test]
    fn render_is_parseable_and_side_effect_free() {
        let registry = MetricsRegistry::new();
        registry.register_counter("requests_total", "Total requests.");
        registry.inc_counter("requests_total", &[("code", "200")], 7.0);

        let first = registry.render();
        let second = registry.render();
        assert_eq!(first, second);

        let families = crate::text::parse(&first).unwrap();
        let fam = families
            .iter()
            .find(|f| f.name == "requests_total")
            .unwrap();
        assert_eq!(fam.kind, MetricKind::Counter);
        assert_eq!(fam.samples[0].value, 7.0);
    }

    #[test]
    fn unregistered_metric_defaults_from_first_write() {
        let registry = MetricsRegistry::new();
        registry.set_gauge("adhoc", &[], 1.0);
        let families = registry.snapshot();
        let fam = families.iter().find(|f| f.name == "adhoc").unwrap();
        assert_eq!(fam.kind, MetricKind::Gauge);
        assert!(fam.help.is_none());
    }

    #[test]
    fn process_metrics_register_and_refresh() {
        let registry = MetricsRegistry::new();
        registry.register_process_metrics();
        registry.refresh_process_metrics();
        let rendered = registry.render();
        assert!(rendered.contains("# TYPE process_resident_memory_bytes gauge"));
    }
}
