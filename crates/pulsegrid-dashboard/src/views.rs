//! View types for dashboard template rendering.
//!
//! These types are purpose-built for Askama templates: they carry
//! pre-formatted strings and computed fields so templates stay simple.
//! The chart builder turns query results into SVG polyline coordinates.

use pulsegrid_query::SeriesResult;
use pulsegrid_store::{Dashboard, DataSource, TargetStatus};

// ── Targets ─────────────────────────────────────────────────────

pub struct TargetRow {
    pub job: String,
    pub address: String,
    pub state: &'static str,
    pub state_color: &'static str,
    pub last_scrape_display: String,
    pub duration_display: String,
    pub error_display: String,
    pub scrapes_total: u64,
    pub failures_total: u64,
}

impl TargetRow {
    pub fn from_status(status: &TargetStatus) -> Self {
        let (state, state_color) = if status.up {
            ("Up", "state-up")
        } else {
            ("Down", "state-down")
        };
        Self {
            job: status.job.clone(),
            address: status.address.clone(),
            state,
            state_color,
            last_scrape_display: format_relative_time_ms(status.last_scrape_ms),
            duration_display: format!("{} ms", status.last_scrape_duration_ms),
            error_display: status.last_error.clone().unwrap_or_default(),
            scrapes_total: status.scrapes_total,
            failures_total: status.failures_total,
        }
    }
}

/// One data source's target table, or the reason it couldn't be fetched.
pub struct SourceTargets {
    pub source: String,
    pub url: String,
    pub error: Option<String>,
    pub rows: Vec<TargetRow>,
}

// ── Data sources ────────────────────────────────────────────────

pub struct DataSourceView {
    pub name: String,
    pub url: String,
    pub kind: String,
    pub created_display: String,
}

impl DataSourceView {
    pub fn from_source(source: &DataSource) -> Self {
        Self {
            name: source.name.clone(),
            url: source.url.clone(),
            kind: source.kind.clone(),
            created_display: format_timestamp_ms(source.created_at),
        }
    }
}

// ── Dashboards ──────────────────────────────────────────────────

pub struct DashboardCard {
    pub slug: String,
    pub title: String,
    pub panel_count: usize,
    pub updated_display: String,
}

impl DashboardCard {
    pub fn from_dashboard(dashboard: &Dashboard) -> Self {
        Self {
            slug: dashboard.slug.clone(),
            title: dashboard.title.clone(),
            panel_count: dashboard.panels.len(),
            updated_display: format_relative_time_ms(dashboard.updated_at),
        }
    }
}

// ── Panels ──────────────────────────────────────────────────────

/// A rendered panel: either a chart or an error state. An erroring panel
/// never takes down its siblings.
pub struct PanelView {
    pub title: String,
    pub datasource: String,
    pub query: String,
    pub chart: Option<ChartView>,
    pub error: Option<String>,
}

pub struct ChartView {
    pub width: u32,
    pub height: u32,
    pub polylines: Vec<Polyline>,
    pub y_min_display: String,
    pub y_max_display: String,
    pub empty: bool,
}

pub struct Polyline {
    /// SVG `points` attribute: `x,y x,y …`.
    pub points: String,
    pub color: &'static str,
    pub label: String,
}

const SERIES_COLORS: &[&str] = &[
    "#38bdf8", "#34d399", "#fbbf24", "#f87171", "#a78bfa", "#f472b6",
];

pub const CHART_WIDTH: u32 = 640;
pub const CHART_HEIGHT: u32 = 180;

/// Build an SVG chart from range-query results.
///
/// X spans `[start_ms, end_ms]`; Y spans the data's min/max with a flat
/// line centered when the series is constant.
pub fn build_chart(series: &[SeriesResult], start_ms: u64, end_ms: u64) -> ChartView {
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;
    for s in series {
        for (_, v) in &s.points {
            if v.is_finite() {
                y_min = y_min.min(*v);
                y_max = y_max.max(*v);
            }
        }
    }

    let empty = series.iter().all(|s| s.points.is_empty());
    if empty || !y_min.is_finite() {
        return ChartView {
            width: CHART_WIDTH,
            height: CHART_HEIGHT,
            polylines: Vec::new(),
            y_min_display: String::new(),
            y_max_display: String::new(),
            empty: true,
        };
    }

    // A constant series still deserves a visible line.
    if (y_max - y_min).abs() < f64::EPSILON {
        y_min -= 1.0;
        y_max += 1.0;
    }

    let x_span = (end_ms.saturating_sub(start_ms)).max(1) as f64;
    let y_span = y_max - y_min;

    let polylines = series
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let points = s
                .points
                .iter()
                .filter(|(_, v)| v.is_finite())
                .map(|(ts, v)| {
                    let x = ((ts.saturating_sub(start_ms)) as f64 / x_span)
                        * CHART_WIDTH as f64;
                    let y = CHART_HEIGHT as f64
                        - ((v - y_min) / y_span) * CHART_HEIGHT as f64;
                    format!("{x:.1},{y:.1}")
                })
                .collect::<Vec<_>>()
                .join(" ");
            Polyline {
                points,
                color: SERIES_COLORS[i % SERIES_COLORS.len()],
                label: series_label(s),
            }
        })
        .collect();

    ChartView {
        width: CHART_WIDTH,
        height: CHART_HEIGHT,
        polylines,
        y_min_display: format_value(y_min),
        y_max_display: format_value(y_max),
        empty: false,
    }
}

/// Compact series identity for the legend: the metric name plus the
/// distinguishing labels.
fn series_label(series: &SeriesResult) -> String {
    let name = series
        .labels
        .get("__name__")
        .cloned()
        .unwrap_or_else(|| "series".to_string());
    let labels: Vec<String> = series
        .labels
        .iter()
        .filter(|(k, _)| *k != "__name__")
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect();
    if labels.is_empty() {
        name
    } else {
        format!("{name}{{{}}}", labels.join(","))
    }
}

// ── Format helpers ──────────────────────────────────────────────

pub fn format_value(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v:.2}")
    }
}

pub fn format_timestamp_ms(timestamp_ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms as i64)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn format_relative_time_ms(timestamp_ms: u64) -> String {
    if timestamp_ms == 0 {
        return "never".to_string();
    }
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let delta_secs = now.saturating_sub(timestamp_ms) / 1000;
    if delta_secs < 60 {
        format!("{delta_secs}s ago")
    } else if delta_secs < 3600 {
        format!("{}m ago", delta_secs / 60)
    } else if delta_secs < 86400 {
        format!("{}h ago", delta_secs / 3600)
    } else {
        format!("{}d ago", delta_secs / 86400)
    }
}
