//! # Frame Normalizer
//!
//! Maps a sparse JSON payload from the pod controller onto the canonical
//! [`TelemetryFrame`].
//!
//! ## Field groups
//!
//! | Group         | Raw keys                                          |
//! |---------------|---------------------------------------------------|
//! | voltage       | `VB1` (lvs), `VB2` (inverter), `VB3` (contacter)  |
//! | temperature   | `dsTemperature` (motor), `objectTemp`,            |
//! |               | `ambientTemp`, `mlxTemperature` (battery)         |
//! | acceleration  | `accel: [x, y, z]` (also rederives `speed`)       |
//! | orientation   | `orientation: [x, y, z]`                          |
//! | calibration   | `calibration: [gyro, sys, magneto]`               |
//! | rangefinder   | `lidarDistance` or `gap_height`, `lidarQuality`   |
//! | bus voltage   | `voltage`                                         |
//! | relay state   | `relayStates: {A, B, C, D}`                       |
//!
//! A scalar group is replaced as a whole when any of its keys is present,
//! even as `null`; keys missing from a touched group, and non-numeric
//! values, become `0`. Vector groups only apply
//! when the value is an array of at least three numbers. Groups with no keys
//! in the payload keep their previous values. Unknown keys are ignored.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use super::frame::{
    Acceleration, Calibration, Orientation, Rangefinder, Temperature, TelemetryFrame, Voltage,
};
use super::history::FrameHistory;
use crate::error::{PodBridgeError, Result};
use crate::relay::{RelayKey, RelayState};

/// Produce the frame that results from applying `payload` to `prev`
///
/// # Arguments
///
/// * `prev` - Frame before this payload
/// * `payload` - Decoded JSON payload; must be an object
/// * `received_at` - Receipt time, used when the payload carries no usable timestamp
///
/// # Returns
///
/// * `Result<TelemetryFrame>` - Updated frame
///
/// # Errors
///
/// Returns a decode error if `payload` is not a JSON object. `prev` is
/// never modified.
pub fn normalize(
    prev: &TelemetryFrame,
    payload: &Value,
    received_at: DateTime<Utc>,
) -> Result<TelemetryFrame> {
    let map = payload.as_object().ok_or_else(|| {
        PodBridgeError::Decode(format!(
            "telemetry payload must be a JSON object, got {}",
            kind(payload)
        ))
    })?;

    let mut frame = prev.clone();

    if any_present(map, &["VB1", "VB2", "VB3"]) {
        frame.voltage = Voltage {
            lvs: number(map, "VB1"),
            inverter: number(map, "VB2"),
            contacter: number(map, "VB3"),
        };
    }

    if any_present(map, &["dsTemperature", "objectTemp", "ambientTemp", "mlxTemperature"]) {
        frame.temperature = Temperature {
            motor: number(map, "dsTemperature"),
            object: number(map, "objectTemp"),
            ambient: number(map, "ambientTemp"),
            battery: number(map, "mlxTemperature"),
        };
    }

    if let Some([x, y, z]) = triple(map, "accel") {
        frame.acceleration = Acceleration::from_axes(x, y, z);
        frame.speed = frame.acceleration.speed();
    }

    if let Some([x, y, z]) = triple(map, "orientation") {
        frame.orientation = Orientation { x, y, z };
    }

    if let Some([gyro, sys, magneto]) = triple(map, "calibration") {
        frame.calibration = Calibration {
            gyro: calibration_level(gyro),
            sys: calibration_level(sys),
            magneto: calibration_level(magneto),
        };
    }

    if any_present(map, &["lidarDistance", "gap_height", "lidarQuality"]) {
        let distance = if present(map, "lidarDistance") {
            number(map, "lidarDistance")
        } else {
            number(map, "gap_height")
        };
        frame.rangefinder = Rangefinder {
            distance,
            quality: number(map, "lidarQuality"),
        };
    }

    if present(map, "voltage") {
        frame.bus_voltage = number(map, "voltage");
    }

    if let Some(state) = reported_relay_state(payload) {
        frame.relay_state = Some(state);
    }

    frame.timestamp = Some(timestamp(map).unwrap_or(received_at));

    Ok(frame)
}

/// Relay state carried in a payload's `relayStates` object
///
/// All four of `A`, `B`, `C`, `D` must be booleans; a partial report is
/// ignored.
pub fn reported_relay_state(payload: &Value) -> Option<RelayState> {
    let states = payload.get("relayStates")?.as_object()?;
    let mut flags = [false; 4];
    for key in RelayKey::ALL {
        flags[key.index()] = states.get(&key.letter().to_string())?.as_bool()?;
    }
    Some(RelayState::from_flags(flags))
}

/// Owns the current frame and its history
#[derive(Debug, Clone, Default)]
pub struct FrameNormalizer {
    current: TelemetryFrame,
    history: FrameHistory,
    frames_applied: u64,
}

impl FrameNormalizer {
    /// Create a normalizer retaining at most `history_capacity` past frames
    pub fn new(history_capacity: usize) -> Self {
        Self {
            current: TelemetryFrame::default(),
            history: FrameHistory::with_capacity(history_capacity),
            frames_applied: 0,
        }
    }

    /// Apply a payload to the current frame and record the result
    ///
    /// # Errors
    ///
    /// Returns a decode error for a non-object payload; the current frame
    /// and history are left untouched.
    pub fn apply(
        &mut self,
        payload: &Value,
        received_at: DateTime<Utc>,
    ) -> Result<&TelemetryFrame> {
        let frame = normalize(&self.current, payload, received_at)?;
        self.history.push(frame.clone());
        self.current = frame;
        self.frames_applied += 1;
        debug!(
            "Normalized frame #{} ({} in history)",
            self.frames_applied,
            self.history.len()
        );
        Ok(&self.current)
    }

    /// Record relay state the device reported outside a telemetry payload
    /// (a `STATE:` line)
    ///
    /// Only the current frame's `relay_state` changes; nothing is added to
    /// the history.
    pub fn set_reported_relay_state(&mut self, state: RelayState) {
        self.current.relay_state = Some(state);
    }

    pub fn current(&self) -> &TelemetryFrame {
        &self.current
    }

    pub fn history(&self) -> &FrameHistory {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Whether any payload has been applied yet
    pub fn has_frame(&self) -> bool {
        self.frames_applied > 0
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A key counts as present whenever it appears, `null` included
fn present(map: &Map<String, Value>, key: &str) -> bool {
    map.contains_key(key)
}

fn any_present(map: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter().any(|key| present(map, key))
}

fn number(map: &Map<String, Value>, key: &str) -> f64 {
    map.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn triple(map: &Map<String, Value>, key: &str) -> Option<[f64; 3]> {
    let values = map.get(key)?.as_array()?;
    if values.len() < 3 {
        return None;
    }
    Some([values[0].as_f64()?, values[1].as_f64()?, values[2].as_f64()?])
}

fn calibration_level(raw: f64) -> u8 {
    raw.round().clamp(0.0, 3.0) as u8
}

/// Payload timestamp as RFC 3339 text or epoch milliseconds
fn timestamp(map: &Map<String, Value>) -> Option<DateTime<Utc>> {
    match map.get("timestamp")? {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| debug!("Ignoring unparseable timestamp {:?}: {}", text, e))
            .ok(),
        Value::Number(n) => n
            .as_f64()
            .filter(|ms| ms.is_finite())
            .and_then(|ms| DateTime::from_timestamp_millis(ms.round() as i64)),
        _ => None,
    }
}
