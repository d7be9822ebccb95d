//! # Telemetry Module
//!
//! Canonical sensor model for the pod controller.
//!
//! This module handles:
//! - The always-fully-populated [`TelemetryFrame`]
//! - Normalizing sparse JSON payloads into that frame
//! - Keeping a bounded FIFO history of recent frames

pub mod frame;
pub mod history;
pub mod normalizer;

pub use frame::{
    Acceleration, Calibration, Orientation, Rangefinder, Temperature, TelemetryFrame, Voltage,
};
pub use history::{FrameHistory, DEFAULT_HISTORY_CAPACITY};
pub use normalizer::{normalize, FrameNormalizer};
