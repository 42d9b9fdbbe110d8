//! pulse-core — configuration types shared across the PulseGrid pipeline.
//!
//! Covers the collector's scrape configuration (`pulse.toml`), the process
//! topology declaration (`topology.toml`), and duration-string parsing.

pub mod config;
pub mod duration;
pub mod topology;

pub use config::{ConfigError, GlobalConfig, PulseConfig, Scheme, ScrapeJob};
pub use duration::parse_duration;
pub use topology::{ProcessSpec, RestartPolicy, TopologyConfig, TopologyError};
