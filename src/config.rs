//! Configuration loading and types for nkv.
//!
//! Configuration is read from an optional YAML file and deserialized into
//! the [`Config`] struct.  Every field has a default so an empty file (or
//! no file at all) yields a runnable single-node setup.  Command-line and
//! environment overrides are applied on top by `main`.

use garde::Validate;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Key-value store limits.
    #[serde(default)]
    pub store: StoreConfig,

    /// Mesh membership and replication settings.
    #[serde(default)]
    pub mesh: MeshConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.  Also the port advertised to the mesh.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host name other nodes use to reach this one.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            hostname: default_hostname(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Limits enforced on client-supplied keys and values.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Keys must be strictly shorter than this many characters.
    #[serde(default = "default_max_key_length")]
    pub max_key_length: usize,

    /// Values must be strictly shorter than this many characters.
    #[serde(default = "default_max_value_length")]
    pub max_value_length: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_key_length: default_max_key_length(),
            max_value_length: default_max_value_length(),
        }
    }
}

/// Mesh configuration.
///
/// The mesh is only activated when `network_url` is set to a non-empty
/// value; otherwise the node runs alone.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MeshConfig {
    /// Rendezvous URL (a neighbour node or a load balancer).
    #[serde(default)]
    #[garde(skip)]
    pub network_url: Option<String>,

    /// Interval between gossip rounds in milliseconds.  Must be non-zero.
    #[serde(default = "default_ping_interval_ms")]
    #[garde(range(min = 1))]
    pub ping_interval_ms: u64,

    /// Per-call timeout for mesh RPCs in milliseconds.  Must be non-zero.
    #[serde(default = "default_request_timeout_ms")]
    #[garde(range(min = 1))]
    pub request_timeout_ms: u64,

    /// Let a Down entry come back to Live when it is learned again.
    #[serde(default)]
    #[garde(skip)]
    pub allow_rejoin: bool,

    /// Skip a gossip tick while the previous round still has pings in flight.
    #[serde(default)]
    #[garde(skip)]
    pub skip_overlapping_rounds: bool,
}

impl MeshConfig {
    /// The bootstrap URL, if the mesh should be activated.
    pub fn bootstrap_url(&self) -> Option<&str> {
        self.network_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            network_url: None,
            ping_interval_ms: default_ping_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            allow_rejoin: false,
            skip_overlapping_rounds: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    80
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_key_length() -> usize {
    64
}

fn default_max_value_length() -> usize {
    256
}

fn default_ping_interval_ms() -> u64 {
    1500
}

fn default_request_timeout_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse configuration from YAML text.  Blank input yields the defaults.
///
/// Rejects zero mesh timings: a zero interval cannot drive a timer and a
/// zero timeout fails every call.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    config
        .mesh
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid mesh configuration: {e}"))?;
    Ok(config)
}
