//! # Pod Bridge Library
//!
//! Bridge a pod controller's serial link to any number of WebSocket subscribers.
//!
//! The controller streams newline-delimited JSON telemetry and `STATE:` relay
//! reports; this library normalizes the telemetry into a fixed frame, scores
//! pod health, fans frames out to subscribers, and forwards subscriber relay
//! commands back to the controller.

pub mod bridge;
pub mod config;
pub mod error;
pub mod health;
pub mod relay;
pub mod serial;
pub mod server;
pub mod telemetry;
