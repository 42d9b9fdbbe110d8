//! pulsegrid-exposition — the metrics surface of an instrumented process.
//!
//! Provides an in-process registry of counters, gauges, and histograms, and
//! the line-oriented text exposition format used between processes: the
//! registry renders into it, the collector parses it back.
//!
//! # Architecture
//!
//! ```text
//! MetricsRegistry
//!   ├── inc_counter() / set_gauge() / observe() ← called by application code
//!   ├── snapshot() → Vec<MetricFamily>
//!   └── render() → text/plain body for the /metrics/ route
//!
//! Text format
//!   ├── render(&[MetricFamily]) → String
//!   └── parse(&str) → Result<Vec<MetricFamily>, ParseError>
//! ```
//!
//! Reading or rendering the registry never mutates the registered values;
//! the `/metrics/` route built on it is side-effect free.

pub mod process;
pub mod registry;
pub mod text;

pub use registry::MetricsRegistry;
pub use text::{parse, render, MetricFamily, MetricKind, ParseError, Sample};
