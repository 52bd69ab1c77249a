//! fleetd.toml configuration.
//!
//! Every section and key is optional; missing values fall back to the
//! defaults below. Command-line flags override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    pub server: ServerConfig,
    pub tools: ToolsConfig,
    pub registration: RegistrationConfig,
    pub cache: CacheConfig,
    pub monitor: MonitorConfig,
    pub repair: RepairConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 18080,
            data_dir: PathBuf::from("/var/lib/fleet"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    pub kubectl: PathBuf,
    pub helm: PathBuf,
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            kubectl: PathBuf::from("kubectl"),
            helm: PathBuf::from("helm"),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistrationConfig {
    pub poll_interval_ms: u64,
    pub readiness_timeout_secs: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            readiness_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub reachability_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            reachability_ttl_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between reachability sweeps; 0 disables the sweep.
    pub reachability_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            reachability_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepairConfig {
    pub chart_repository: String,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            chart_repository: fleet_cluster::DEFAULT_CHART_REPOSITORY.to_string(),
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tools.timeout_secs)
    }

    pub fn registration_timings(&self) -> fleet_cluster::RegistrationTimings {
        fleet_cluster::RegistrationTimings {
            poll_interval: Duration::from_millis(self.registration.poll_interval_ms),
            readiness_timeout: Duration::from_secs(self.registration.readiness_timeout_secs),
        }
    }

    pub fn reachability_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.reachability_ttl_secs)
    }

    /// `None` when the sweep is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.monitor.reachability_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
