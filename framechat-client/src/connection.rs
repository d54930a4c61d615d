//! Connection settings.

use framechat_protocol::{DEFAULT_MAX_PAYLOAD, DEFAULT_PORT, DEFAULT_READ_BUFFER_SIZE};
use std::path::PathBuf;
use std::time::Duration;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Largest accepted frame body, in bytes.
    pub max_payload: u64,
    /// Directory for accepted attachments without an explicit path.
    pub download_dir: PathBuf,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_payload: DEFAULT_MAX_PAYLOAD,
            download_dir: PathBuf::from("."),
        }
    }

    /// Parses `host:port`, or a bare host using the default port.
    pub fn from_address(address: &str) -> Self {
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => match port.parse() {
                Ok(port) => Self::new(host.trim_matches(['[', ']']), port),
                Err(_) => Self::new(address, DEFAULT_PORT),
            },
            _ => Self::new(address, DEFAULT_PORT),
        }
    }

    /// Returns the `host:port` string to connect to.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_max_payload(mut self, max: u64) -> Self {
        self.max_payload = max;
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.address(), "127.0.0.1:8080");
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config = ConnectionConfig::default().with_read_buffer_size(100);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ConnectionConfig::default().with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_from_address() {
        let config = ConnectionConfig::from_address("chat.local:9000");
        assert_eq!(config.host, "chat.local");
        assert_eq!(config.port, 9000);

        let config = ConnectionConfig::from_address("localhost");
        assert_eq!(config.port, DEFAULT_PORT);

        let config = ConnectionConfig::from_address("[::1]:8081");
        assert_eq!(config.host, "::1");
        assert_eq!(config.address(), "[::1]:8081");
    }
}
