//! Configuration management for Tessera.
//!
//! A node is configured from a *home* directory laid out as:
//!
//! ```text
//! $TESSERA_HOME/
//!   config/server.toml    node options (this module)
//!   config/cluster.toml   initial cluster topology
//!   data/                 storage engine files
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::NodeId;

/// Environment variable naming the home directory.
pub const HOME_ENV_VAR: &str = "TESSERA_HOME";

/// Name of the options file inside `<home>/config`.
pub const SERVER_CONFIG_FILE: &str = "server.toml";

/// Name of the topology file inside the metadata directory.
pub const CLUSTER_CONFIG_FILE: &str = "cluster.toml";

/// Main configuration for a Tessera node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Node identity and directories.
    pub node: NodeConfig,
    /// Client socket listener.
    pub server: ServerConfig,
    /// Administrative listener and client.
    pub admin: AdminConfig,
    /// Peer metadata gossip.
    pub gossip: GossipConfig,
    /// Management exporter.
    pub metrics: MetricsConfig,
    /// Background task runner.
    pub runner: RunnerConfig,
    /// Periodic job scheduler.
    pub scheduler: SchedulerConfig,
    /// Interrupted rebalance recovery.
    pub rebalance: RebalanceConfig,
    /// Storage service.
    pub storage: StorageConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration from a home directory, resolving relative
    /// directories against it.
    ///
    /// # Errors
    ///
    /// Returns an error if `<home>/config/server.toml` is missing, malformed or invalid.
    pub fn load_from_home(home: &Path) -> Result<Self> {
        if !home.is_dir() {
            return Err(Error::Config(format!(
                "home directory {} does not exist",
                home.display()
            )));
        }

        let mut config = Self::from_file(&home.join("config").join(SERVER_CONFIG_FILE))?;
        config.resolve_paths(home);
        config.validate()?;
        debug!(
            home = %home.display(),
            node_id = config.node.node_id,
            metadata_dir = %config.node.metadata_dir.display(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Load configuration from the directory named by [`HOME_ENV_VAR`].
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is unset or the home cannot be loaded.
    pub fn load_from_env() -> Result<Self> {
        let home = std::env::var_os(HOME_ENV_VAR).ok_or_else(|| {
            Error::Config(format!("no home directory given and {HOME_ENV_VAR} is not set"))
        })?;
        Self::load_from_home(Path::new(&home))
    }

    /// Makes relative metadata and data directories absolute under `home`.
    pub fn resolve_paths(&mut self, home: &Path) {
        if self.node.metadata_dir.is_relative() {
            self.node.metadata_dir = home.join(&self.node.metadata_dir);
        }
        if self.node.data_dir.is_relative() {
            self.node.data_dir = home.join(&self.node.data_dir);
        }
    }

    /// Checks option values that would make the node unusable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid option.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.runner.threads == 0, "runner.threads must be at least 1"),
            (self.runner.cache_size == 0, "runner.cache_size must be at least 1"),
            (self.scheduler.threads == 0, "scheduler.threads must be at least 1"),
            (self.server.core_threads == 0, "server.core_threads must be at least 1"),
            (self.server.max_threads == 0, "server.max_threads must be at least 1"),
            (self.admin.max_connections == 0, "admin.max_connections must be at least 1"),
            (self.rebalance.max_attempts == 0, "rebalance.max_attempts must be at least 1"),
            (self.rebalance.timeout_secs == 0, "rebalance.timeout_secs must be positive"),
            (
                self.admin.connection_timeout_ms == 0,
                "admin.connection_timeout_ms must be positive",
            ),
            (self.admin.request_timeout_ms == 0, "admin.request_timeout_ms must be positive"),
            (self.admin.poll_interval_ms == 0, "admin.poll_interval_ms must be positive"),
            (self.gossip.interval_ms == 0, "gossip.interval_ms must be positive"),
        ];

        match checks.iter().find(|(invalid, _)| *invalid) {
            Some((_, message)) => Err(Error::Config((*message).to_string())),
            None => Ok(()),
        }
    }
}

/// Node identity and directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// ID of this node in the cluster topology.
    pub node_id: NodeId,
    /// Directory holding the metadata database and `cluster.toml`.
    pub metadata_dir: PathBuf,
    /// Directory for storage engine files.
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { node_id: 0, metadata_dir: PathBuf::from("config"), data_dir: PathBuf::from("data") }
    }
}

/// How the client socket listener accepts connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    /// Serves up to `max_threads` connections concurrently.
    #[default]
    Multiplexed,
    /// Serves up to `core_threads` connections concurrently.
    Pooled,
}

/// Client socket listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Enable the client socket listener.
    pub socket_enabled: bool,
    /// Connection acceptance strategy.
    pub connector: ConnectorKind,
    /// Concurrently served connections for the pooled connector.
    pub core_threads: usize,
    /// Concurrently served connections for the multiplexed connector.
    pub max_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_enabled: true,
            connector: ConnectorKind::Multiplexed,
            core_threads: 8,
            max_threads: 100,
        }
    }
}

/// Administrative listener and client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the administrative listener.
    pub enabled: bool,
    /// Maximum concurrent administrative requests served.
    pub max_connections: usize,
    /// Timeout for establishing an administrative connection, in milliseconds.
    pub connection_timeout_ms: u64,
    /// Timeout for a single administrative request, in milliseconds.
    pub request_timeout_ms: u64,
    /// Interval between remote task status polls, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_connections: 20,
            connection_timeout_ms: 60_000,
            request_timeout_ms: 30_000,
            poll_interval_ms: 1_000,
        }
    }
}

impl AdminConfig {
    /// Connection timeout as a [`Duration`].
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Peer metadata gossip configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Enable the gossip service.
    pub enabled: bool,
    /// Interval between gossip rounds, in milliseconds.
    pub interval_ms: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self { enabled: false, interval_ms: 30_000 }
    }
}

impl GossipConfig {
    /// Gossip interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Management exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    pub enabled: bool,
    /// Bind address for the exporter.
    pub bind: String,
    /// Port for the exporter.
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: false, bind: "0.0.0.0".to_string(), port: 9464 }
    }
}

/// Background task runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Number of worker tasks.
    pub threads: usize,
    /// Number of completed task outcomes retained for status queries.
    pub cache_size: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { threads: 8, cache_size: 64 }
    }
}

/// Periodic job scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum jobs running at once.
    pub threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { threads: 6 }
    }
}

/// Interrupted rebalance recovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    /// How long to wait for one resume attempt, in seconds.
    pub timeout_secs: u64,
    /// Maximum resume attempts before forcing the node into normal state.
    pub max_attempts: u32,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self { timeout_secs: 24 * 60 * 60, max_attempts: 3 }
    }
}

impl RebalanceConfig {
    /// Attempt timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Storage service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Stores hosted by this node.
    pub stores: Vec<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Pretty }
    }
}
