//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files, with
//! environment-variable overrides applied on top.
//!
//! Every field has a default, so the bridge runs with no configuration file
//! at all.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{PodBridgeError, Result};
use crate::relay::CommandDialect;

/// Environment variable overriding [`ServerConfig::port`]
pub const ENV_WS_PORT: &str = "POD_WS_PORT";
/// Environment variable overriding [`SerialConfig::port`]
pub const ENV_SERIAL_PORT: &str = "POD_SERIAL_PORT";
/// Environment variable overriding [`SerialConfig::baud_rate`]
pub const ENV_BAUD_RATE: &str = "POD_BAUD_RATE";
/// Environment variable overriding [`SerialConfig::reconnect_interval_ms`]
pub const ENV_RECONNECT_MS: &str = "POD_RECONNECT_MS";
/// Environment variable overriding [`SerialConfig::dialect`]
pub const ENV_DIALECT: &str = "POD_DIALECT";

/// Baud rates accepted by the pod controller firmware
const SUPPORTED_BAUD_RATES: &[u32] = &[9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream serial link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default)]
    pub dialect: CommandDialect,
}

/// Downstream WebSocket listener configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_ws_port")]
    pub port: u16,
}

/// Telemetry retention configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Directory for rolling log files; console only when unset
    #[serde(default)]
    pub directory: Option<String>,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_reconnect_interval_ms() -> u64 { 3000 }

fn default_bind_address() -> String { "0.0.0.0".to_string() }
fn default_ws_port() -> u16 { 8080 }

fn default_history_capacity() -> usize { 100 }

fn default_file_prefix() -> String { "pod-bridge.log".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            dialect: CommandDialect::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_ws_port(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            file_prefix: default_file_prefix(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use pod_bridge::config::Config;
    ///
    /// let config = Config::load("config/pod-bridge.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from defaults plus environment overrides
    ///
    /// # Errors
    ///
    /// Returns error if an override cannot be parsed or the result is invalid
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `POD_*` environment variables on top of the current values
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set but malformed, or the resulting
    /// configuration fails validation
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(ENV_WS_PORT) {
            self.server.port = parse_override(ENV_WS_PORT, &port)?;
        }

        if let Some(path) = lookup(ENV_SERIAL_PORT) {
            self.serial.port = path;
        }

        if let Some(baud) = lookup(ENV_BAUD_RATE) {
            self.serial.baud_rate = parse_override(ENV_BAUD_RATE, &baud)?;
        }

        if let Some(delay) = lookup(ENV_RECONNECT_MS) {
            self.serial.reconnect_interval_ms = parse_override(ENV_RECONNECT_MS, &delay)?;
        }

        if let Some(dialect) = lookup(ENV_DIALECT) {
            self.serial.dialect = dialect.parse()?;
        }

        self.validate()
    }

    /// Validate configuration values
    ///
    /// # Returns
    ///
    /// * `Result<()>` - Ok if valid, Err if invalid
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(config_error("serial port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(config_error(format!(
                "baud_rate must be one of: {:?}",
                SUPPORTED_BAUD_RATES
            )));
        }

        if self.serial.reconnect_interval_ms == 0 || self.serial.reconnect_interval_ms > 60000 {
            return Err(config_error("reconnect_interval_ms must be between 1 and 60000"));
        }

        if self.server.bind_address.is_empty() {
            return Err(config_error("server bind_address cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(config_error("server port must be greater than 0"));
        }

        if self.telemetry.history_capacity == 0 {
            return Err(config_error("history_capacity must be greater than 0"));
        }

        if matches!(&self.logging.directory, Some(dir) if dir.is_empty()) {
            return Err(config_error("logging directory cannot be empty when set"));
        }

        Ok(())
    }

    /// Socket address the WebSocket listener binds to
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }
}

fn config_error(msg: impl std::fmt::Display) -> PodBridgeError {
    PodBridgeError::Config(toml::de::Error::custom(msg))
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| config_error(format!("{} has an invalid value: {:?}", key, value)))
}
