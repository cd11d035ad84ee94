//! Server configuration.
//!
//! Configuration can be loaded from:
//! - A TOML file (`IMPULSE_CONFIG`, `./impulse.toml`, `/etc/impulse/impulse.toml`,
//!   `~/.config/impulse/impulse.toml`, first match wins)
//! - Environment variables (`IMPULSE__SECTION__KEY`, e.g. `IMPULSE__HEARTBEAT__INTERVAL_MS`)
//! - `IMPULSE_HOST` / `IMPULSE_PORT` for the bind address

use anyhow::{anyhow, bail, Context, Result};
use impulse_core::topic::validate_topic_name;
use impulse_core::{RelayConfig, RouterConfig, RoutingMode};
use impulse_protocol::MAX_MESSAGE_SIZE;
use impulse_transport::SessionConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Signal routing.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Account directory.
    #[serde(default)]
    pub accounts: AccountsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Outbound frames buffered per connection.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Routing mode names accepted in the config file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeName {
    /// One topic per username.
    #[default]
    Direct,
    /// One shared topic for every receiver.
    Broadcast,
    /// One topic per username prefix.
    Prefix,
}

/// Routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Routing mode.
    #[serde(default)]
    pub mode: ModeName,

    /// Topic used by broadcast routing.
    #[serde(default = "default_shared_topic")]
    pub shared_topic: String,

    /// Partition prefixes used by prefix routing.
    #[serde(default)]
    pub prefixes: Vec<String>,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// How long a ping may go unanswered, in milliseconds. Defaults to the
    /// interval.
    #[serde(default)]
    pub no_pong_threshold_ms: Option<u64>,

    /// Missed pongs tolerated before a connection is evicted.
    #[serde(default = "default_max_missed_pongs")]
    pub max_missed_pongs: u32,
}

/// Account directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// JSON file listing known accounts.
    #[serde(default = "default_accounts_path")]
    pub path: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("IMPULSE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("IMPULSE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    MAX_MESSAGE_SIZE
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_shared_topic() -> String {
    impulse_core::routing::DEFAULT_SHARED_TOPIC.to_string()
}

fn default_heartbeat_interval() -> u64 {
    10_000 // 10 seconds
}

fn default_max_missed_pongs() -> u32 {
    1
}

fn default_accounts_path() -> String {
    "accounts.json".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            routing: RoutingConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            accounts: AccountsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            max_message_size: default_max_message_size(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            mode: ModeName::default(),
            shared_topic: default_shared_topic(),
            prefixes: Vec::new(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            no_pong_threshold_ms: None,
            max_missed_pongs: default_max_missed_pongs(),
        }
    }
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            path: default_accounts_path(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl RoutingConfig {
    /// The routing mode this section describes.
    #[must_use]
    pub fn routing_mode(&self) -> RoutingMode {
        match self.mode {
            ModeName::Direct => RoutingMode::Direct,
            ModeName::Broadcast => RoutingMode::Broadcast {
                topic: self.shared_topic.clone(),
            },
            ModeName::Prefix => RoutingMode::prefix(self.prefixes.iter().cloned()),
        }
    }
}

impl HeartbeatConfig {
    /// Heartbeat settings for the relay core.
    #[must_use]
    pub fn to_core(&self) -> impulse_core::HeartbeatConfig {
        let interval = Duration::from_millis(self.interval_ms);
        impulse_core::HeartbeatConfig {
            interval,
            no_pong_threshold: self
                .no_pong_threshold_ms
                .map_or(interval, Duration::from_millis),
            max_missed_pongs: self.max_missed_pongs,
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, with
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or the
    /// result is invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::find_file().as_deref())
    }

    fn find_file() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("IMPULSE_CONFIG") {
            return Some(PathBuf::from(shellexpand::tilde(&path).as_ref()));
        }

        let config_paths = [
            "impulse.toml",
            "/etc/impulse/impulse.toml",
            "~/.config/impulse/impulse.toml",
        ];

        config_paths
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Load configuration from an optional file plus `IMPULSE__*`
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the result
    /// is invalid.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("IMPULSE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("routing.prefixes"),
            )
            .build()
            .with_context(|| match path {
                Some(path) => format!("Failed to load config file: {}", path.display()),
                None => "Failed to load configuration".to_string(),
            })?;

        let config: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be parsed or the result is
    /// invalid.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Check values the relay cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.interval_ms == 0 {
            bail!("heartbeat.interval_ms must be greater than zero");
        }
        if self.transport.max_message_size == 0 {
            bail!("transport.max_message_size must be greater than zero");
        }
        if !self.transport.websocket_path.starts_with('/') {
            bail!(
                "transport.websocket_path must start with '/': {}",
                self.transport.websocket_path
            );
        }
        validate_topic_name(&self.routing.shared_topic)
            .map_err(|e| anyhow!("routing.shared_topic {:?}: {}", self.routing.shared_topic, e))?;
        if self.routing.prefixes.iter().any(String::is_empty) {
            bail!("routing.prefixes must not contain an empty prefix");
        }
        if self.routing.mode == ModeName::Prefix && self.routing.prefixes.is_empty() {
            warn!("Prefix routing without prefixes: no receiver will join a topic");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}:{}", self.host, self.port))
    }

    /// Relay settings derived from this configuration.
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            router: RouterConfig {
                mode: self.routing.routing_mode(),
            },
            heartbeat: self.heartbeat.to_core(),
            broker: impulse_core::BrokerConfig::default(),
        }
    }

    /// Per-connection session settings.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_message_size: self.transport.max_message_size,
            queue_capacity: self.transport.queue_capacity,
        }
    }
}
