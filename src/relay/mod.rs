//! # Relay Module
//!
//! Actuator control for the pod's four relays.
//!
//! This module handles:
//! - The single-character relay command protocol (`A`..`D` on, `a`..`d` off)
//! - Locally tracked relay state with optimistic updates
//! - Authoritative `STATE:` echoes from the device
//! - Encoding commands for either upstream device dialect

pub mod command;
pub mod dialect;
pub mod tracker;

pub use command::{parse_state_line, RelayCommand, RelayKey, RelayState, StateSource};
pub use dialect::{CommandDialect, DeviceCommand};
pub use tracker::RelayTracker;
