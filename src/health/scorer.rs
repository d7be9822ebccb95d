//! # Health Scorer
//!
//! Five weighted metrics, weights summing to 100:
//!
//! | Metric         | Weight | Source                                  |
//! |----------------|--------|-----------------------------------------|
//! | Connection     | 25     | upstream link up or down                |
//! | Power System   | 25     | LVS, inverter and contacter rails       |
//! | Thermal System | 30     | hottest temperature channel             |
//! | Motion Sensors | 10     | acceleration magnitude present          |
//! | Data Stream    | 10     | age of the newest frame                 |
//!
//! `criticalIssues` and `warnings` are advisory only.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::relay::RelayState;
use crate::telemetry::TelemetryFrame;

/// Connection metric weight
pub const WEIGHT_CONNECTION: u32 = 25;
/// Power system metric weight
pub const WEIGHT_POWER: u32 = 25;
/// Thermal metric weight
pub const WEIGHT_THERMAL: u32 = 30;
/// Motion sensor metric weight
pub const WEIGHT_MOTION: u32 = 10;
/// Data stream metric weight
pub const WEIGHT_DATA_STREAM: u32 = 10;

/// Temperature above which an emergency shutdown is required (°C)
pub const TEMP_CRITICAL_C: f64 = 120.0;
/// Temperature above which the thermal system is critical (°C)
pub const TEMP_DANGER_C: f64 = 100.0;
/// Temperature above which the thermal system is in warning (°C)
pub const TEMP_CAUTION_C: f64 = 80.0;
/// Temperature above which the thermal system is merely good (°C)
pub const TEMP_NORMAL_C: f64 = 60.0;

/// Frame age thresholds in milliseconds
pub const AGE_EXCELLENT_MS: i64 = 1000;
pub const AGE_GOOD_MS: i64 = 3000;
pub const AGE_WARNING_MS: i64 = 5000;
pub const AGE_CRITICAL_MS: i64 = 10000;

/// Nominal operating window of one voltage rail
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RailSpec {
    pub nominal: f64,
    pub min: f64,
    pub max: f64,
}

/// Low-voltage system rail: 12 V (10–14)
pub const LVS_RAIL: RailSpec = RailSpec { nominal: 12.0, min: 10.0, max: 14.0 };
/// Inverter rail: 48 V (40–54)
pub const INVERTER_RAIL: RailSpec = RailSpec { nominal: 48.0, min: 40.0, max: 54.0 };
/// Contacter rail: 24 V (20–28)
pub const CONTACTER_RAIL: RailSpec = RailSpec { nominal: 24.0, min: 20.0, max: 28.0 };

/// Health bucket for a metric or the whole pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Excellent,
    Good,
    Warning,
    Critical,
    Offline,
}

impl HealthStatus {
    /// Bucket an overall score: `≥80` excellent, `≥60` good, `≥40` warning,
    /// `>0` critical, `0` offline
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => HealthStatus::Excellent,
            60..=79 => HealthStatus::Good,
            40..=59 => HealthStatus::Warning,
            1..=39 => HealthStatus::Critical,
            0 => HealthStatus::Offline,
        }
    }
}

/// One weighted sub-score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthMetric {
    pub name: &'static str,
    pub status: HealthStatus,
    /// 0..=100
    pub value: f64,
    pub weight: u32,
    pub message: String,
}

/// Aggregate health view
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub overall_score: u8,
    pub overall_status: HealthStatus,
    pub metrics: Vec<HealthMetric>,
    pub critical_issues: Vec<String>,
    pub warnings: Vec<String>,
}

/// Everything the scorer looks at
#[derive(Debug, Clone, Copy)]
pub struct HealthInput<'a> {
    pub connected: bool,
    pub frame: &'a TelemetryFrame,
    pub relay_state: RelayState,
    /// Milliseconds since the frame's timestamp; `None` if never stamped
    pub frame_age_ms: Option<i64>,
}

impl<'a> HealthInput<'a> {
    /// Build an input, deriving the frame age relative to `now`
    pub fn at(
        connected: bool,
        frame: &'a TelemetryFrame,
        relay_state: RelayState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            connected,
            frame,
            relay_state,
            frame_age_ms: frame.age_ms(now),
        }
    }
}

/// Compute the health report
///
/// Deterministic: identical inputs always yield identical reports.
///
/// # Arguments
///
/// * `input` - Link status, frame, relay state and frame age
///
/// # Returns
///
/// * `HealthReport` - Weighted score, status, per-metric breakdown and advisories
pub fn score(input: &HealthInput<'_>) -> HealthReport {
    let mut critical_issues = Vec::new();
    let mut warnings = Vec::new();

    let metrics = vec![
        connection_metric(input.connected, &mut critical_issues),
        power_metric(input.frame, input.relay_state, &mut critical_issues, &mut warnings),
        thermal_metric(input.frame, &mut critical_issues, &mut warnings),
        motion_metric(input.frame, &mut warnings),
        data_stream_metric(input.frame_age_ms, &mut critical_issues, &mut warnings),
    ];

    let total_weight: u32 = metrics.iter().map(|m| m.weight).sum();
    let weighted_sum: f64 = metrics.iter().map(|m| m.value * m.weight as f64).sum();
    let overall_score = (weighted_sum / total_weight as f64).round().clamp(0.0, 100.0) as u8;

    HealthReport {
        overall_score,
        overall_status: HealthStatus::from_score(overall_score),
        metrics,
        critical_issues,
        warnings,
    }
}

fn connection_metric(connected: bool, critical_issues: &mut Vec<String>) -> HealthMetric {
    if !connected {
        critical_issues.push("Pod controller connection lost".to_string());
    }

    HealthMetric {
        name: "Connection",
        status: if connected { HealthStatus::Excellent } else { HealthStatus::Offline },
        value: if connected { 100.0 } else { 0.0 },
        weight: WEIGHT_CONNECTION,
        message: if connected {
            "Pod controller connected".to_string()
        } else {
            "Not connected to pod controller".to_string()
        },
    }
}

/// Score one rail: 0 if unread, 25 if out of window, else deviation from nominal
pub fn rail_score(actual: f64, rail: RailSpec) -> f64 {
    if actual == 0.0 {
        return 0.0;
    }
    if actual < rail.min || actual > rail.max {
        return 25.0;
    }
    let deviation = (actual - rail.nominal).abs() / rail.nominal;
    (100.0 - deviation * 100.0).max(0.0)
}

fn power_metric(
    frame: &TelemetryFrame,
    relay_state: RelayState,
    critical_issues: &mut Vec<String>,
    warnings: &mut Vec<String>,
) -> HealthMetric {
    let v = &frame.voltage;
    let average = (rail_score(v.lvs, LVS_RAIL)
        + rail_score(v.inverter, INVERTER_RAIL)
        + rail_score(v.contacter, CONTACTER_RAIL))
        / 3.0;

    let status = if average > 80.0 {
        HealthStatus::Excellent
    } else if average > 60.0 {
        HealthStatus::Good
    } else if average > 40.0 {
        HealthStatus::Warning
    } else if average > 0.0 {
        HealthStatus::Critical
    } else {
        HealthStatus::Offline
    };

    if average == 0.0 {
        critical_issues.push("No voltage readings from power system".to_string());
    } else if average < 40.0 {
        critical_issues.push("Power system voltage critically low".to_string());
    } else if average < 60.0 {
        warnings.push("Power system voltage below optimal range".to_string());
    }

    let energized: Vec<String> = relay_state.energized().iter().map(|k| k.to_string()).collect();
    let relays = if energized.is_empty() {
        "none".to_string()
    } else {
        energized.join(",")
    };

    HealthMetric {
        name: "Power System",
        status,
        value: average,
        weight: WEIGHT_POWER,
        message: format!(
            "LVS: {:.1}V, Inverter: {:.1}V, Contacter: {:.1}V, Relays on: {}",
            v.lvs, v.inverter, v.contacter, relays
        ),
    }
}

fn thermal_metric(
    frame: &TelemetryFrame,
    critical_issues: &mut Vec<String>,
    warnings: &mut Vec<String>,
) -> HealthMetric {
    let t = &frame.temperature;
    let max_temp = t.max();

    let (value, status) = if max_temp == 0.0 {
        critical_issues.push("No temperature readings available".to_string());
        (0.0, HealthStatus::Offline)
    } else if max_temp > TEMP_CRITICAL_C {
        critical_issues.push(format!(
            "CRITICAL: Temperature at {:.1}°C - emergency shutdown required!",
            max_temp
        ));
        (0.0, HealthStatus::Critical)
    } else if max_temp > TEMP_DANGER_C {
        critical_issues.push(format!("Temperature dangerously high: {:.1}°C", max_temp));
        (25.0, HealthStatus::Critical)
    } else if max_temp > TEMP_CAUTION_C {
        warnings.push(format!("Temperature elevated: {:.1}°C", max_temp));
        (50.0, HealthStatus::Warning)
    } else if max_temp > TEMP_NORMAL_C {
        (75.0, HealthStatus::Good)
    } else {
        (100.0, HealthStatus::Excellent)
    };

    HealthMetric {
        name: "Thermal System",
        status,
        value,
        weight: WEIGHT_THERMAL,
        message: format!(
            "Motor: {:.1}°C, Battery: {:.1}°C, Max: {:.1}°C",
            t.motor, t.battery, max_temp
        ),
    }
}

fn motion_metric(frame: &TelemetryFrame, warnings: &mut Vec<String>) -> HealthMetric {
    let magnitude = frame.acceleration.magnitude;
    let operational = magnitude > 0.0;

    if !operational {
        warnings.push("Motion sensors not responding".to_string());
    }

    HealthMetric {
        name: "Motion Sensors",
        status: if operational { HealthStatus::Excellent } else { HealthStatus::Offline },
        value: if operational { 100.0 } else { 0.0 },
        weight: WEIGHT_MOTION,
        message: if operational {
            format!("IMU operational ({:.2} m/s²)", magnitude)
        } else {
            "No IMU data received".to_string()
        },
    }
}

fn data_stream_metric(
    age_ms: Option<i64>,
    critical_issues: &mut Vec<String>,
    warnings: &mut Vec<String>,
) -> HealthMetric {
    let (value, status) = match age_ms {
        Some(age) if age < AGE_EXCELLENT_MS => (100.0, HealthStatus::Excellent),
        Some(age) if age < AGE_GOOD_MS => (75.0, HealthStatus::Good),
        Some(age) if age < AGE_WARNING_MS => {
            warnings.push("Data stream experiencing delays".to_string());
            (50.0, HealthStatus::Warning)
        }
        Some(age) if age < AGE_CRITICAL_MS => {
            warnings.push("Data stream critically delayed".to_string());
            (25.0, HealthStatus::Critical)
        }
        _ => {
            critical_issues.push("No recent data received".to_string());
            (0.0, HealthStatus::Offline)
        }
    };

    let message = match age_ms {
        Some(age) if age < 60_000 => format!("Last update: {:.1}s ago", age as f64 / 1000.0),
        _ => "No recent data".to_string(),
    };

    HealthMetric {
        name: "Data Stream",
        status,
        value,
        weight: WEIGHT_DATA_STREAM,
        message,
    }
}
