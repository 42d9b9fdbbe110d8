//! topology.toml — declarative description of the pipeline's processes.
//!
//! Each process entry names its image or build source, exposed ports, the
//! shared networks it joins, its restart policy, and any named volumes it
//! mounts. Process names double as the logical hostnames processes use to
//! resolve one another, so they must be unique.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to read topology file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse topology: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("duplicate process name {0:?}")]
    DuplicateProcess(String),

    #[error("process {process:?} has neither an image nor a build source")]
    NoSource { process: String },

    #[error("process {process:?} joins undeclared network {network:?}")]
    UnknownNetwork { process: String, network: String },

    #[error("process {process:?} mounts undeclared volume {volume:?}")]
    UnknownVolume { process: String, volume: String },

    #[error("process {process:?} has malformed port mapping {mapping:?} (expected host:container)")]
    MalformedPort { process: String, mapping: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Shared virtual networks; processes on the same network resolve each
    /// other by process name.
    #[serde(default)]
    pub networks: Vec<String>,
    /// Named persistent volumes.
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(rename = "process", default)]
    pub processes: Vec<ProcessSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub name: String,
    /// Pre-built image reference. Mutually completing with `build`.
    pub image: Option<String>,
    /// Local build source directory.
    pub build: Option<String>,
    /// "host:container" port mappings.
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub restart: RestartPolicy,
    /// "volume:/mount/path" entries.
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure,
    #[default]
    UnlessStopped,
}

impl TopologyConfig {
    pub fn from_file(path: &Path) -> Result<Self, TopologyError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, TopologyError> {
        let topology: TopologyConfig = toml::from_str(content)?;
        topology.validate()?;
        Ok(topology)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    fn validate(&self) -> Result<(), TopologyError> {
        let networks: HashSet<&str> = self.networks.iter().map(String::as_str).collect();
        let volumes: HashSet<&str> = self.volumes.iter().map(String::as_str).collect();

        let mut seen = HashSet::new();
        for p in &self.processes {
            if !seen.insert(p.name.as_str()) {
                return Err(TopologyError::DuplicateProcess(p.name.clone()));
            }
            if p.image.is_none() && p.build.is_none() {
                return Err(TopologyError::NoSource {
                    process: p.name.clone(),
                });
            }
            for net in &p.networks {
                if !networks.contains(net.as_str()) {
                    return Err(TopologyError::UnknownNetwork {
                        process: p.name.clone(),
                        network: net.clone(),
                    });
                }
            }
            for vol in &p.volumes {
                let name = vol.split_once(':').map(|(n, _)| n).unwrap_or(vol);
                if !volumes.contains(name) {
                    return Err(TopologyError::UnknownVolume {
                        process: p.name.clone(),
                        volume: name.to_string(),
                    });
                }
            }
            for mapping in &p.ports {
                let ok = match mapping.split_once(':') {
                    Some((host, container)) => {
                        host.parse::<u16>().is_ok() && container.parse::<u16>().is_ok()
                    }
                    None => false,
                };
                if !ok {
                    return Err(TopologyError::MalformedPort {
                        process: p.name.clone(),
                        mapping: mapping.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Whether `from` can resolve `to` by name (both on some shared network).
    pub fn can_resolve(&self, from: &str, to: &str) -> bool {
        let Some(a) = self.processes.iter().find(|p| p.name == from) else {
            return false;
        };
        let Some(b) = self.processes.iter().find(|p| p.name == to) else {
            return false;
        };
        a.networks.iter().any(|n| b.networks.contains(n))
    }

    /// Scaffold the standard three-process pipeline: an instrumented
    /// exporter, the collector scraping it, and the dashboard querying the
    /// collector. One shared network; the dashboard keeps its state on a
    /// named volume so dashboards and users survive restarts.
    pub fn scaffold() -> Self {
        TopologyConfig {
            networks: vec!["pulsenet".to_string()],
            volumes: vec!["pulse-data".to_string(), "dashboard-data".to_string()],
            processes: vec![
                ProcessSpec {
                    name: "node_exporter".to_string(),
                    image: Some("pulsegrid/pulsed:latest".to_string()),
                    build: None,
                    ports: vec!["9100:9100".to_string()],
                    networks: vec!["pulsenet".to_string()],
                    restart: RestartPolicy::UnlessStopped,
                    volumes: vec![],
                    command: vec!["exporter".to_string()],
                },
                ProcessSpec {
                    name: "pulsed".to_string(),
                    image: Some("pulsegrid/pulsed:latest".to_string()),
                    build: None,
                    ports: vec!["9464:9464".to_string()],
                    networks: vec!["pulsenet".to_string()],
                    restart: RestartPolicy::UnlessStopped,
                    volumes: vec!["pulse-data:/var/lib/pulsegrid".to_string()],
                    command: vec!["collector".to_string()],
                },
                ProcessSpec {
                    name: "dashboard".to_string(),
                    image: Some("pulsegrid/pulsed:latest".to_string()),
                    build: None,
                    ports: vec!["3000:3000".to_string()],
                    networks: vec!["pulsenet".to_string()],
                    restart: RestartPolicy::UnlessStopped,
                    volumes: vec!["dashboard-data:/var/lib/pulsegrid".to_string()],
                    command: vec!["dashboard".to_string()],
                },
            ],
        }
    }
}
