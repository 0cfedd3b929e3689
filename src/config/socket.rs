//! Server and socket configuration
//!
//! Loaded from a TOML file; every key is optional and falls back to the
//! defaults below.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0"
//! port = 7350
//!
//! [socket]
//! ping_period_ms = 15000
//! pong_wait_ms = 25000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid socket config: {0}")]
    Invalid(String),
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 7350,
        }
    }
}

/// Per-connection socket settings, shared by every session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SocketConfig {
    /// Interval between outbound pings
    pub ping_period_ms: u64,
    /// Read deadline window; must exceed the ping period
    pub pong_wait_ms: u64,
    /// Bound for the close handshake write
    pub write_wait_ms: u64,
    /// Inbound data messages between read deadline extensions
    pub received_message_decrement_count: u32,
    /// Capacity of each session's outgoing queue
    pub outgoing_queue_size: usize,
    /// Largest inbound message accepted, in bytes
    pub max_message_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            ping_period_ms: 15_000,
            pong_wait_ms: 25_000,
            write_wait_ms: 5_000,
            received_message_decrement_count: 1,
            outgoing_queue_size: 16,
            max_message_size: 4096,
        }
    }
}

impl SocketConfig {
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Check the settings a session relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_period_ms == 0 || self.pong_wait_ms == 0 || self.write_wait_ms == 0 {
            return Err(ConfigError::Invalid(
                "ping_period_ms, pong_wait_ms and write_wait_ms must be non-zero".to_string(),
            ));
        }
        if self.pong_wait_ms <= self.ping_period_ms {
            return Err(ConfigError::Invalid(format!(
                "pong_wait_ms ({}) must exceed ping_period_ms ({})",
                self.pong_wait_ms, self.ping_period_ms
            )));
        }
        if self.received_message_decrement_count == 0 {
            return Err(ConfigError::Invalid(
                "received_message_decrement_count must be at least 1".to_string(),
            ));
        }
        if self.outgoing_queue_size == 0 {
            return Err(ConfigError::Invalid(
                "outgoing_queue_size must be at least 1".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "max_message_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Root configuration file
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub socket: SocketConfig,
}

impl Config {
    /// Load and validate configuration; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.socket.validate()?;
        Ok(config)
    }
}
