//! # Configuration Management
//!
//! Centralized configuration for the session engines.
//!
//! This module provides structured configuration for servers and clients:
//! per-tick transmit budgets, liveness windows, reconnection policy, and
//! logging options.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! All duration fields are serialized as integer milliseconds.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Ingress buffer size for each TCP connection and for the shared UDP
/// socket, in bytes.
pub const INGRESS_BUFFER_SIZE: usize = 65_536;

/// Maximum length of a registered data name, in bytes. Longer names are
/// truncated at registration time.
pub const MAX_DATA_NAME_LEN: usize = 1024;

/// Multiplier applied to the liveness interval to derive the timeout window.
pub const TIMEOUT_FACTOR: f64 = 3.1;

/// Upper bound on any timeout window, in milliseconds.
pub const MAX_TIMEOUT_MS: f64 = 999_999.0;

/// Root configuration structure gathering all configurable settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::Config(format!("failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(delay) = std::env::var("DUALPORT_ALIVENESS_DELAY_MS") {
            if let Ok(val) = delay.parse::<u64>() {
                config.server.aliveness_test_delay = Duration::from_millis(val);
                config.client.aliveness_test_delay = Duration::from_millis(val);
            }
        }

        if let Ok(backlog) = std::env::var("DUALPORT_CONNECTION_BACKLOG") {
            if let Ok(val) = backlog.parse::<u32>() {
                config.server.new_connection_backlog = val;
            }
        }

        if let Ok(delay) = std::env::var("DUALPORT_CONNECTION_DELAY_MS") {
            if let Ok(val) = delay.parse::<u64>() {
                config.client.connection_delay = Duration::from_millis(val);
            }
        }

        Ok(config)
    }

    /// Serialize the default configuration as example file content.
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# failed to generate example config"))
    }

    /// Validate the configuration for common misconfigurations.
    ///
    /// Returns a list of findings; an empty list means the configuration is
    /// valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors
    }

    /// Validate and return `Err` on the first problem.
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::Config(format!(
                "configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// How many pending connections are accepted per update step; the rest
    /// must retry on a later tick.
    pub new_connection_backlog: u32,

    /// Maximum number of UDP receives per update step
    pub max_udp_transmits_per_update: u32,

    /// Maximum number of TCP receives per connection per update step
    pub max_tcp_transmits_per_update: u32,

    /// Whether the server binds a UDP socket and accepts connectionless
    /// packets
    pub allow_udp_packets: bool,

    /// Whether the address blacklist is consulted on accept
    pub use_blacklist: bool,

    /// Whether the address whitelist is consulted on accept
    pub use_whitelist: bool,

    /// How often aliveness tests are sent to clients. Larger values forgive
    /// network hiccups; smaller values detect timeouts faster.
    #[serde(with = "duration_ms")]
    pub aliveness_test_delay: Duration,

    /// Whether retained data of disconnected clients is eventually flushed,
    /// firing the destroy callback. Should stay enabled whenever entries
    /// carry user data.
    pub should_flush_disconnected_client_data: bool,

    /// How long a disconnected client's data is retained for reconnection
    /// before it is flushed.
    #[serde(with = "duration_ms")]
    pub disconnected_client_flush_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            new_connection_backlog: 32,
            max_udp_transmits_per_update: 256,
            max_tcp_transmits_per_update: 4,
            allow_udp_packets: true,
            use_blacklist: true,
            use_whitelist: false,
            aliveness_test_delay: Duration::from_millis(1000),
            should_flush_disconnected_client_data: true,
            disconnected_client_flush_delay: Duration::from_millis(999_999),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.new_connection_backlog == 0 {
            errors.push("connection backlog must be greater than 0".to_string());
        }

        if self.max_tcp_transmits_per_update == 0 || self.max_udp_transmits_per_update == 0 {
            errors.push("per-update transmit budgets must be greater than 0".to_string());
        }

        if self.aliveness_test_delay.as_millis() < 10 {
            errors.push("aliveness test delay too short (minimum: 10ms)".to_string());
        }

        if self.should_flush_disconnected_client_data
            && self.disconnected_client_flush_delay.as_millis() == 0
        {
            errors.push("disconnected client flush delay must be greater than 0".to_string());
        }

        errors
    }
}

/// Client engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Whether the client binds a UDP socket and accepts connectionless
    /// packets
    pub allow_udp_packets: bool,

    /// Maximum number of UDP receives per update step
    pub max_udp_transmits_per_update: u32,

    /// Maximum number of TCP receives per update step
    pub max_tcp_transmits_per_update: u32,

    /// Whether the client tries to reconnect after losing the session
    pub should_attempt_reconnect: bool,

    /// Maximum connection attempts before `connect` gives up
    pub max_connection_attempts: u32,

    /// Maximum reconnection attempts before the client gives up and
    /// disconnects fully
    pub max_reconnection_attempts: u32,

    /// Delay between connection and reconnection attempts
    #[serde(with = "duration_ms")]
    pub connection_delay: Duration,

    /// How often aliveness tests are sent to the server
    #[serde(with = "duration_ms")]
    pub aliveness_test_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            allow_udp_packets: true,
            max_udp_transmits_per_update: 256,
            max_tcp_transmits_per_update: 4,
            should_attempt_reconnect: true,
            max_connection_attempts: 50,
            max_reconnection_attempts: 100,
            connection_delay: Duration::from_millis(200),
            aliveness_test_delay: Duration::from_millis(1000),
        }
    }
}

impl ClientConfig {
    /// Validate client configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_connection_attempts == 0 {
            errors.push("max connection attempts must be greater than 0".to_string());
        }

        if self.should_attempt_reconnect && self.max_reconnection_attempts == 0 {
            errors.push(
                "max reconnection attempts must be greater than 0 when reconnect is enabled"
                    .to_string(),
            );
        }

        if self.connection_delay.as_millis() < 10 {
            errors.push("connection delay too short (minimum: 10ms)".to_string());
        }

        if self.aliveness_test_delay.as_millis() < 10 {
            errors.push("aliveness test delay too short (minimum: 10ms)".to_string());
        }

        errors
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("dualport"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

/// Millisecond representation for `Duration` fields.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// String representation for `tracing::Level` fields.
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.to_string().to_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("invalid log level: {level_str}")))
    }
}
