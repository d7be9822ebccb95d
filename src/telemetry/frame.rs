//! # Telemetry Frame
//!
//! Decoded snapshot of every sensor channel. Numeric fields are `0` until
//! first observed.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::relay::RelayState;

/// Gravity removed from the acceleration magnitude for the speed estimate (m/s²)
pub const GRAVITY_MPS2: f64 = 9.8;

/// Rail voltages in volts
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Voltage {
    pub inverter: f64,
    pub lvs: f64,
    pub contacter: f64,
}

/// Temperatures in degrees Celsius
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Temperature {
    pub motor: f64,
    pub object: f64,
    pub ambient: f64,
    pub battery: f64,
}

impl Temperature {
    /// Hottest of the four channels
    pub fn max(&self) -> f64 {
        self.motor.max(self.object).max(self.battery).max(self.ambient)
    }
}

/// Linear acceleration in m/s²
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Acceleration {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub magnitude: f64,
}

impl Acceleration {
    /// Build from the three axes; `magnitude` is always derived here
    pub fn from_axes(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            magnitude: (x * x + y * y + z * z).sqrt(),
        }
    }

    /// Speed estimate with gravity removed: `|magnitude - 9.8|`
    pub fn speed(&self) -> f64 {
        (self.magnitude - GRAVITY_MPS2).abs()
    }
}

/// Orientation in degrees (roll, pitch, yaw)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Orientation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// IMU calibration levels, each 0..=3
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Calibration {
    pub gyro: u8,
    pub sys: u8,
    pub magneto: u8,
}

/// LiDAR gap measurement
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Rangefinder {
    /// Distance in meters
    pub distance: f64,
    pub quality: f64,
}

/// Canonical device state at a point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryFrame {
    /// `None` until the first payload arrives
    pub timestamp: Option<DateTime<Utc>>,
    pub voltage: Voltage,
    pub temperature: Temperature,
    pub acceleration: Acceleration,
    /// m/s, rederived whenever acceleration is updated
    pub speed: f64,
    pub orientation: Orientation,
    pub calibration: Calibration,
    pub rangefinder: Rangefinder,
    pub bus_voltage: f64,
    /// Only present once the device itself has reported relay state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_state: Option<RelayState>,
}

impl TelemetryFrame {
    /// Milliseconds between this frame's timestamp and `now`
    ///
    /// Returns `None` if the frame has never been stamped.
    pub fn age_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        self.timestamp.map(|ts| (now - ts).num_milliseconds())
    }
}
