//! pulse.toml configuration parser.
//!
//! The collector's scrape configuration: a global section with the default
//! scrape interval, plus a list of scrape jobs with static target lists.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::duration::parse_duration;

/// Errors produced while loading or validating a scrape configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration {value:?} in {field}")]
    InvalidDuration { field: String, value: String },

    #[error("duplicate job name {0:?}")]
    DuplicateJob(String),

    #[error("job {job:?} has no targets")]
    NoTargets { job: String },

    #[error("job {job:?} has malformed target {target:?} (expected host:port)")]
    MalformedTarget { job: String, target: String },

    #[error("job {job:?} requests the https scheme, which this scraper does not speak; \
             terminate TLS in front of the target and scrape it over http")]
    HttpsUnsupported { job: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    pub global: GlobalConfig,
    #[serde(rename = "scrape_job", default)]
    pub scrape_jobs: Vec<ScrapeJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default interval between scrapes of each target (e.g., "5s").
    pub scrape_interval: String,
    /// Default per-scrape timeout. Defaults to the interval when absent.
    pub scrape_timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub job_name: String,
    /// Per-job interval override.
    pub scrape_interval: Option<String>,
    /// Must match the target's exposed route exactly, trailing slash included.
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
    #[serde(default)]
    pub scheme: Scheme,
    /// Static list of host:port targets.
    pub targets: Vec<String>,
}

fn default_metrics_path() -> String {
    "/metrics/".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl PulseConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PulseConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require_duration("global.scrape_interval", &self.global.scrape_interval)?;
        if let Some(t) = &self.global.scrape_timeout {
            require_duration("global.scrape_timeout", t)?;
        }

        let mut seen = HashSet::new();
        for job in &self.scrape_jobs {
            if !seen.insert(job.job_name.as_str()) {
                return Err(ConfigError::DuplicateJob(job.job_name.clone()));
            }
            if let Some(i) = &job.scrape_interval {
                require_duration(&format!("{}.scrape_interval", job.job_name), i)?;
            }
            if job.scheme == Scheme::Https {
                return Err(ConfigError::HttpsUnsupported {
                    job: job.job_name.clone(),
                });
            }
            if job.targets.is_empty() {
                return Err(ConfigError::NoTargets {
                    job: job.job_name.clone(),
                });
            }
            for target in &job.targets {
                let valid = match target.rsplit_once(':') {
                    Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
                    None => false,
                };
                if !valid {
                    return Err(ConfigError::MalformedTarget {
                        job: job.job_name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Effective scrape interval for a job (job override or global default).
    pub fn interval_for(&self, job: &ScrapeJob) -> Duration {
        job.scrape_interval
            .as_deref()
            .and_then(parse_duration)
            .or_else(|| parse_duration(&self.global.scrape_interval))
            .unwrap_or(Duration::from_secs(5))
    }

    /// Effective scrape timeout for a job, clamped to the interval so a
    /// scrape never outlives its slot.
    pub fn timeout_for(&self, job: &ScrapeJob) -> Duration {
        let interval = self.interval_for(job);
        self.global
            .scrape_timeout
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(interval)
            .min(interval)
    }

    /// Scaffold a minimal config scraping a local exporter and the collector
    /// itself.
    pub fn scaffold() -> Self {
        PulseConfig {
            global: GlobalConfig {
                scrape_interval: "5s".to_string(),
                scrape_timeout: Some("4s".to_string()),
            },
            scrape_jobs: vec![
                ScrapeJob {
                    job_name: "node_exporter".to_string(),
                    scrape_interval: None,
                    metrics_path: "/metrics/".to_string(),
                    scheme: Scheme::Http,
                    targets: vec!["node_exporter:9100".to_string()],
                },
                ScrapeJob {
                    job_name: "pulsed".to_string(),
                    scrape_interval: Some("10s".to_string()),
                    metrics_path: "/metrics".to_string(),
                    scheme: Scheme::Http,
                    targets: vec!["pulsed:9464".to_string()],
                },
            ],
        }
    }
}

fn require_duration(field: &str, value: &str) -> Result<(), ConfigError> {
    parse_duration(value)
        .map(|_| ())
        .ok_or_else(|| ConfigError::InvalidDuration {
            field: field.to_string(),
            value: value.to_string(),
        })
}
