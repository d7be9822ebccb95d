//! # Health Module
//!
//! Weighted health assessment of the pod, derived from the current
//! telemetry frame, link status, relay state and frame recency.
//!
//! The scorer is a pure function: reports are recomputed on demand and
//! never cached.

pub mod scorer;

pub use scorer::{score, HealthInput, HealthMetric, HealthReport, HealthStatus};
