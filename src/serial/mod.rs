//! # Serial Communication Module
//!
//! Handles the serial link to the pod controller (ESP32 over USB).
//!
//! This module handles:
//! - Opening the serial port at the configured baud rate (8N1, no flow control)
//! - Auto-detecting the device among common paths
//! - Abstracting the link behind [`UpstreamConnector`] so the bridge can reopen it

pub mod port_trait;

pub use port_trait::{BoxedUpstream, UpstreamConnector, UpstreamStream};

use async_trait::async_trait;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::error::{PodBridgeError, Result};

/// Default pod controller baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Configured port value that requests auto-detection
pub const AUTO_DETECT: &str = "auto";

/// Device paths tried by auto-detection (in order of preference)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyUSB0", // CP210x / CH340 USB-to-serial (most ESP32 dev boards)
    "/dev/ttyACM0", // Native USB CDC
];

/// Opens the pod controller's serial port on demand
#[derive(Debug, Clone)]
pub struct SerialConnector {
    /// Paths to try, first success wins
    paths: Vec<String>,
    baud_rate: u32,
}

impl SerialConnector {
    /// Connector for a configured port
    ///
    /// `"auto"` expands to [`DEFAULT_DEVICE_PATHS`].
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use pod_bridge::serial::SerialConnector;
    ///
    /// let connector = SerialConnector::new("/dev/ttyUSB0", 115_200);
    /// ```
    pub fn new(port: &str, baud_rate: u32) -> Self {
        if port.eq_ignore_ascii_case(AUTO_DETECT) {
            return Self::with_paths(DEFAULT_DEVICE_PATHS, baud_rate);
        }
        Self {
            paths: vec![port.to_string()],
            baud_rate,
        }
    }

    /// Connector that tries several paths in order
    pub fn with_paths(paths: &[&str], baud_rate: u32) -> Self {
        Self {
            paths: paths.iter().map(|p| p.to_string()).collect(),
            baud_rate,
        }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Open the first path that works
    ///
    /// # Returns
    ///
    /// * `Result<(SerialStream, String)>` - Opened port and the path used
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` listing every path tried
    fn open_first(&self) -> Result<(tokio_serial::SerialStream, String)> {
        for path in &self.paths {
            debug!("Trying to open serial port: {}", path);

            match open_port(path, self.baud_rate) {
                Ok(port) => {
                    info!("Opened pod controller at {} ({} baud)", path, self.baud_rate);
                    return Ok((port, path.clone()));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(PodBridgeError::SerialPortNotFound(self.paths.join(", ")))
    }
}

#[async_trait]
impl UpstreamConnector for SerialConnector {
    async fn connect(&self) -> Result<BoxedUpstream> {
        let (port, _path) = self.open_first()?;
        Ok(Box::new(port))
    }

    fn describe(&self) -> String {
        format!("serial {} @ {} baud", self.paths.join("|"), self.baud_rate)
    }
}

/// Open a specific serial port with 8N1 settings
///
/// # Arguments
///
/// * `path` - Device path (e.g., "/dev/ttyUSB0")
/// * `baud_rate` - Line speed
///
/// # Returns
///
/// * `Result<SerialStream>` - Opened serial port
fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
    let port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| PodBridgeError::Serial(format!("Failed to open {}: {}", path, e)))?;

    Ok(port)
}
