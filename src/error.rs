//! # Error Types
//!
//! Custom error types for Pod Bridge using `thiserror`.

use thiserror::Error;

/// Main error type for Pod Bridge
#[derive(Debug, Error)]
pub enum PodBridgeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Upstream serial link errors (open, read, write)
    #[error("Serial error: {0}")]
    Serial(String),

    /// No upstream device could be opened at any of the given paths
    #[error("Serial port not found (tried: {0})")]
    SerialPortNotFound(String),

    /// Malformed telemetry payload or `STATE:` line
    #[error("Decode error: {0}")]
    Decode(String),

    /// Encoding a subscriber message failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Subscriber sent something that is not a known command
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// A command was submitted while no upstream link is open
    #[error("Upstream device not connected")]
    NotConnected,

    /// Subscriber WebSocket errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Result type alias for Pod Bridge
pub type Result<T> = std::result::Result<T, PodBridgeError>;
