//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via FRAMECHAT_CONFIG)
//! 3. Environment variables

use crate::server::DEFAULT_MAX_PENDING_ATTACHMENTS;
use framechat_protocol::{DEFAULT_PORT, DEFAULT_READ_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Largest `limits.max_payload_mb` whose byte count fits in a `u64`.
pub const MAX_PAYLOAD_MB: u64 = u64::MAX / BYTES_PER_MB;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Frame size limits.
    pub limits: LimitsConfig,
    /// Where accepted attachments go.
    pub attachments: AttachmentsConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("FRAMECHAT_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::ParseError(_, msg) => ConfigError::ParseError(path.to_path_buf(), msg),
            other => other,
        })
    }

    /// Parses configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content)
            .map_err(|e| ConfigError::ParseError(PathBuf::from("<inline>"), e.to_string()))
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.limits.apply_env_overrides();
        self.attachments.apply_env_overrides();
        self.metrics.apply_env_overrides();
    }

    /// Checks values that would make the server unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "network.max_connections must be at least 1".to_string(),
            ));
        }
        if self.network.read_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "network.read_buffer_size must be at least 1".to_string(),
            ));
        }
        if self.network.write_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "network.write_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.limits.max_payload_mb == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_payload_mb must be at least 1".to_string(),
            ));
        }
        if self.limits.max_payload_mb > MAX_PAYLOAD_MB {
            return Err(ConfigError::ValidationError(format!(
                "limits.max_payload_mb must be at most {}",
                MAX_PAYLOAD_MB
            )));
        }
        if self.limits.max_pending_attachments == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_pending_attachments must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Size of each socket read, in bytes.
    pub read_buffer_size: usize,
    /// Seconds a peer may take to accept one outbound frame before it is
    /// dropped.
    pub write_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 1000,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_timeout_secs: 30,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("FRAMECHAT_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(max) = std::env::var("FRAMECHAT_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }

        if let Ok(size) = std::env::var("FRAMECHAT_READ_BUFFER_SIZE") {
            if let Ok(n) = size.parse() {
                self.read_buffer_size = n;
            }
        }

        if let Ok(secs) = std::env::var("FRAMECHAT_WRITE_TIMEOUT_SECS") {
            if let Ok(n) = secs.parse() {
                self.write_timeout_secs = n;
            }
        }
    }

    /// Returns the per-peer write timeout.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Frame size limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted frame body in megabytes.
    pub max_payload_mb: u64,
    /// Attachments one peer may have waiting for a disposition. Further
    /// attachments from that peer are dropped.
    pub max_pending_attachments: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payload_mb: 64,
            max_pending_attachments: DEFAULT_MAX_PENDING_ATTACHMENTS,
        }
    }
}

impl LimitsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("FRAMECHAT_MAX_PAYLOAD_MB") {
            if let Ok(mb) = size.parse() {
                self.max_payload_mb = mb;
            }
        }

        if let Ok(max) = std::env::var("FRAMECHAT_MAX_PENDING_ATTACHMENTS") {
            if let Ok(n) = max.parse() {
                self.max_pending_attachments = n;
            }
        }
    }

    /// Returns the payload ceiling in bytes.
    pub fn max_payload(&self) -> u64 {
        self.max_payload_mb.saturating_mul(BYTES_PER_MB)
    }
}

/// Attachment storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentsConfig {
    /// Directory used when an attachment is accepted without a path.
    pub download_dir: PathBuf,
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
        }
    }
}

impl AttachmentsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("FRAMECHAT_DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(dir);
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics HTTP server.
    pub enabled: bool,
    /// Address to bind the metrics server to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9090)),
        }
    }
}

impl MetricsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("FRAMECHAT_METRICS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(addr) = std::env::var("FRAMECHAT_METRICS_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serializes `SocketAddr` as a plain string in YAML.
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
