//! Songlist Configuration
//!
//! This module provides configuration structures for a songlist
//! replica process.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main songlist configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SonglistConfig {
    /// Replica-specific configuration
    pub node: NodeConfig,

    /// Cluster configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Replica-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Replica identifier; must parse as a non-negative integer, the
    /// election compares ids numerically
    pub id: String,

    /// Address to bind for cluster communication
    pub bind_address: String,

    /// Advertised address for other replicas to connect
    #[serde(default)]
    pub advertise_address: Option<String>,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// List of peer replica addresses
    #[serde(default)]
    pub peers: Vec<String>,

    /// Heartbeat send interval in milliseconds
    #[serde(default = "default_beatrate_ms")]
    pub beatrate_ms: u64,

    /// A peer is considered alive while its last heartbeat is younger
    /// than this, in milliseconds; also the delay of every commit-phase
    /// timeout
    #[serde(default = "default_alive_threshold_ms")]
    pub alive_threshold_ms: u64,

    /// Delay before the replica decides whether to promote itself to
    /// coordinator, in milliseconds
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_beatrate_ms() -> u64 {
    500
}

fn default_alive_threshold_ms() -> u64 {
    2000
}

fn default_startup_delay_ms() -> u64 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            beatrate_ms: default_beatrate_ms(),
            alive_threshold_ms: default_alive_threshold_ms(),
            startup_delay_ms: default_startup_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl SonglistConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SonglistConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: SonglistConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.node.id.parse::<u64>().is_err() {
            return Err(crate::Error::Config(format!(
                "node.id must be a non-negative integer, got {:?}",
                self.node.id
            )));
        }

        if self.node.bind_address.is_empty() {
            return Err(crate::Error::Config(
                "node.bind_address cannot be empty".into(),
            ));
        }

        if self.cluster.alive_threshold_ms <= self.cluster.beatrate_ms {
            return Err(crate::Error::Config(
                "cluster.alive_threshold_ms must exceed cluster.beatrate_ms".into(),
            ));
        }

        Ok(())
    }

    /// Get the advertised address (or bind address if not set)
    pub fn advertise_address(&self) -> &str {
        self.node
            .advertise_address
            .as_deref()
            .unwrap_or(&self.node.bind_address)
    }

    /// Get the heartbeat interval as Duration
    pub fn beatrate(&self) -> Duration {
        Duration::from_millis(self.cluster.beatrate_ms)
    }

    /// Get the liveness threshold as Duration
    pub fn alive_threshold(&self) -> Duration {
        Duration::from_millis(self.cluster.alive_threshold_ms)
    }

    /// Get the coordinator-promotion delay as Duration
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.cluster.startup_delay_ms)
    }
}
