//! Configuration management for the capfs daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/capfs/config.toml`.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 8888;

/// Default registry capacity.
pub const DEFAULT_CAPACITY: usize = 20;

/// Upper bound accepted for the registry capacity.
pub const MAX_CAPACITY: usize = 10_000;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("capacity must be between 1 and 10000, got {0}")]
    InvalidCapacity(usize),

    #[error("backlog must be greater than 0, got {0}")]
    InvalidBacklog(u32),

    #[error("bind_address must be an IP address, got {0}")]
    InvalidBindAddress(String),

    #[error("max_line_length must be between 64 and 65536, got {0}")]
    InvalidMaxLineLength(usize),

    #[error("allowed_groups contains an invalid group name: {0:?}")]
    InvalidAllowedGroup(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the capfs daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Listener and storage configuration.
    pub server: ServerConfig,

    /// File registry configuration.
    pub registry: RegistryConfig,

    /// Login access control.
    pub access: AccessConfig,

    /// Simulated I/O durations.
    pub timing: TimingConfig,

    /// Per-connection session behavior.
    pub session: SessionConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Optional file to write logs to in addition to stderr.
    pub log_file: Option<PathBuf>,
}

/// Listener and storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_address: String,

    /// TCP port to listen on.
    pub port: u16,

    /// Listen backlog for pending connections.
    pub backlog: u32,

    /// Directory holding the backing file for each entry.
    pub storage_dir: PathBuf,
}

/// File registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum number of entries. Slots are never reclaimed.
    pub capacity: usize,
}

/// Login access control.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AccessConfig {
    /// Groups allowed to log in. Empty means every group is allowed.
    pub allowed_groups: Vec<String>,
}

/// Simulated I/O durations.
///
/// Reads and writes hold the entry lock for this long before touching the
/// backing file, which makes lock contention observable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Hold time for a read, in milliseconds.
    pub read_delay_ms: u64,

    /// Hold time for a write, in milliseconds.
    pub write_delay_ms: u64,
}

/// Per-connection session behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Send a `waiting` notice before blocking on a busy entry.
    pub contention_notice: bool,

    /// Maximum request line length in bytes.
    pub max_line_length: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            backlog: 5,
            storage_dir: PathBuf::from("."),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            read_delay_ms: 3000,
            write_delay_ms: 8000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            contention_notice: false,
            max_line_length: protocol::MAX_LINE_LENGTH,
        }
    }
}

impl AccessConfig {
    /// Whether a group may log in.
    pub fn is_group_allowed(&self, group: &str) -> bool {
        self.allowed_groups.is_empty() || self.allowed_groups.iter().any(|g| g == group)
    }
}

impl TimingConfig {
    /// No simulated delay; useful for tests.
    pub fn immediate() -> Self {
        Self {
            read_delay_ms: 0,
            write_delay_ms: 0,
        }
    }

    /// Read hold time.
    pub fn read_delay(&self) -> Duration {
        Duration::from_millis(self.read_delay_ms)
    }

    /// Write hold time.
    pub fn write_delay(&self) -> Duration {
        Duration::from_millis(self.write_delay_ms)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("capfs")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - CAPFS_PORT: Override listen port
    /// - CAPFS_STORAGE_DIR: Override storage directory
    /// - CAPFS_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("CAPFS_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Overriding port from environment: {}", port);
                    self.server.port = port;
                }
                Err(_) if port.is_empty() => {}
                Err(e) => {
                    tracing::warn!("Ignoring invalid CAPFS_PORT {:?}: {}", port, e);
                }
            }
        }

        if let Ok(dir) = std::env::var("CAPFS_STORAGE_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding storage_dir from environment: {}", dir);
                self.server.storage_dir = PathBuf::from(dir);
            }
        }

        if let Ok(level) = std::env::var("CAPFS_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.capacity < 1 || self.registry.capacity > MAX_CAPACITY {
            return Err(ConfigError::InvalidCapacity(self.registry.capacity));
        }

        if self.server.backlog == 0 {
            return Err(ConfigError::InvalidBacklog(self.server.backlog));
        }

        self.socket_addr()?;

        let max_line = self.session.max_line_length;
        if !(64..=65536).contains(&max_line) {
            return Err(ConfigError::InvalidMaxLineLength(max_line));
        }

        for group in &self.access.allowed_groups {
            if protocol::validate_identity("group", group).is_err() {
                return Err(ConfigError::InvalidAllowedGroup(group.clone()));
            }
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// The socket address to listen on.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .server
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.server.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
