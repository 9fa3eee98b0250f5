//! Hub configuration.
//!
//! Loaded from a TOML file and/or environment variables; every field has a
//! serde default, so a missing file yields a runnable configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration for the hub
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Control-plane tuning knobs
    #[serde(default)]
    pub grid: GridConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Public port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4444
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Control-plane tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Value a node must present on registration; mismatches are rejected
    #[serde(default)]
    pub registration_secret: String,

    /// Cadence of expected node heartbeats, in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Staleness threshold before a node is probed and eligible for
    /// eviction; three heartbeat intervals when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unhealthy_after_secs: Option<u64>,

    /// End-to-end budget for one new-session request, in seconds
    #[serde(default = "default_new_session_timeout")]
    pub new_session_timeout_secs: u64,

    /// Per-call budget for upstream node RPCs, in seconds
    #[serde(default = "default_node_rpc_timeout")]
    pub node_rpc_timeout_secs: u64,

    /// Per-call budget for status probes, in seconds
    #[serde(default = "default_health_probe_timeout")]
    pub health_probe_timeout_secs: u64,

    /// Retry ceiling for lost-race reservations
    #[serde(default = "default_max_placement_attempts")]
    pub max_placement_attempts: u32,

    /// Frequency of the orphan-reservation sweep, in seconds
    #[serde(default = "default_janitor_interval")]
    pub janitor_interval_secs: u64,

    /// Capability keys matched as don't-care when absent from a stereotype
    #[serde(default)]
    pub informational_keys: Vec<String>,
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_new_session_timeout() -> u64 {
    300
}

fn default_node_rpc_timeout() -> u64 {
    180
}

fn default_health_probe_timeout() -> u64 {
    10
}

fn default_max_placement_attempts() -> u32 {
    3
}

fn default_janitor_interval() -> u64 {
    30
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            registration_secret: String::new(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            unhealthy_after_secs: None,
            new_session_timeout_secs: default_new_session_timeout(),
            node_rpc_timeout_secs: default_node_rpc_timeout(),
            health_probe_timeout_secs: default_health_probe_timeout(),
            max_placement_attempts: default_max_placement_attempts(),
            janitor_interval_secs: default_janitor_interval(),
            informational_keys: Vec::new(),
        }
    }
}

impl GridConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn unhealthy_after(&self) -> Duration {
        Duration::from_secs(
            self.unhealthy_after_secs
                .unwrap_or(self.heartbeat_interval_secs * 3),
        )
    }

    pub fn new_session_timeout(&self) -> Duration {
        Duration::from_secs(self.new_session_timeout_secs)
    }

    pub fn node_rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.node_rpc_timeout_secs)
    }

    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health_probe_timeout_secs)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }
}

impl Config {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Load from `BROWSERGRID_CONFIG` if set, then apply environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("BROWSERGRID_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Environment overrides for the knobs operators set most often.
    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("BROWSERGRID_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("BROWSERGRID_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(secret) = std::env::var("BROWSERGRID_REGISTRATION_SECRET") {
            self.grid.registration_secret = secret;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 4444);
        assert_eq!(config.grid.heartbeat_interval_secs, 30);
        assert_eq!(config.grid.new_session_timeout_secs, 300);
        assert_eq!(config.grid.node_rpc_timeout_secs, 180);
        assert_eq!(config.grid.health_probe_timeout_secs, 10);
        assert_eq!(config.grid.max_placement_attempts, 3);
        assert_eq!(config.grid.janitor_interval_secs, 30);
        assert!(config.grid.registration_secret.is_empty());
    }

    #[test]
    fn test_unhealthy_after_derived_from_heartbeat() {
        let mut grid = GridConfig::default();
        assert_eq!(grid.unhealthy_after(), Duration::from_secs(90));

        grid.heartbeat_interval_secs = 10;
        assert_eq!(grid.unhealthy_after(), Duration::from_secs(30));

        grid.unhealthy_after_secs = Some(120);
        assert_eq!(grid.unhealthy_after(), Duration::from_secs(120));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 5555

[grid]
registration_secret = "hunter2"
heartbeat_interval_secs = 10
informational_keys = ["se:downloadsEnabled"]
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 5555);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.grid.registration_secret, "hunter2");
        assert_eq!(config.grid.heartbeat_interval_secs, 10);
        assert_eq!(
            config.grid.informational_keys,
            vec!["se:downloadsEnabled".to_string()]
        );
    }

    #[test]
    fn test_from_file_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(Error::Config(_))
        ));
    }
}
