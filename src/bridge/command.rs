//! # Subscriber Commands
//!
//! Text commands accepted from downstream subscribers.
//!
//! | Text                       | Meaning                                   |
//! |----------------------------|-------------------------------------------|
//! | `A`..`D` / `a`..`d`        | turn one relay ON / OFF                   |
//! | `RELAYx_ON` / `RELAYx_OFF` | same, word form                           |
//! | `EMERGENCY_BRAKE`          | emergency stop sequence `a, d, b, c`      |
//! | `RESUME`                   | resume sequence `D, A, B, c`              |
//! | `ALL_ON` / `ALL_OFF`       | every relay ON / OFF                      |
//! | `STATUS`                   | ask the device to report relay state      |
//!
//! One message may carry several commands separated by newlines.

use std::str::FromStr;

use crate::error::PodBridgeError;
use crate::relay::{RelayCommand, RelayKey};

/// A command from a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    Relay(RelayCommand),
    EmergencyBrake,
    Resume,
    AllOn,
    AllOff,
    Status,
}

impl FromStr for ClientCommand {
    type Err = PodBridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();

        let mut chars = text.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return RelayCommand::from_token(c)
                .map(ClientCommand::Relay)
                .ok_or_else(|| PodBridgeError::InvalidCommand(text.to_string()));
        }

        match text.to_ascii_uppercase().as_str() {
            "EMERGENCY_BRAKE" => Ok(ClientCommand::EmergencyBrake),
            "RESUME" => Ok(ClientCommand::Resume),
            "ALL_ON" => Ok(ClientCommand::AllOn),
            "ALL_OFF" => Ok(ClientCommand::AllOff),
            "STATUS" => Ok(ClientCommand::Status),
            upper => parse_named_relay(upper)
                .map(ClientCommand::Relay)
                .ok_or_else(|| PodBridgeError::InvalidCommand(text.to_string())),
        }
    }
}

/// `RELAYx_ON` / `RELAYx_OFF`
fn parse_named_relay(upper: &str) -> Option<RelayCommand> {
    let rest = upper.strip_prefix("RELAY")?;
    let (letter, state) = rest.split_once('_')?;

    let mut chars = letter.chars();
    let key = match (chars.next(), chars.next()) {
        (Some(c), None) => RelayKey::from_letter(c)?,
        _ => return None,
    };

    match state {
        "ON" => Some(RelayCommand::new(key, true)),
        "OFF" => Some(RelayCommand::new(key, false)),
        _ => None,
    }
}

/// Split a subscriber message into its commands
///
/// Blank lines are skipped. Each entry pairs the raw text with its parse
/// result so rejections can echo what was sent.
pub fn parse_client_message(message: &str) -> Vec<(String, Result<ClientCommand, PodBridgeError>)> {
    message
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| (line.to_string(), line.parse()))
        .collect()
}
