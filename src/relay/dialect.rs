//! # Device Command Dialects
//!
//! The pod controller firmware exists in two variants that accept different
//! command spellings. Only one dialect is active per connection.
//!
//! | Command        | `letter` | `named`         |
//! |----------------|----------|-----------------|
//! | relay A on     | `A`      | `RELAYA_ON`     |
//! | relay A off    | `a`      | `RELAYA_OFF`    |
//! | all on         | `A B C D`| `ALL_ON`        |
//! | all off        | `a b c d`| `ALL_OFF`       |
//! | status request | (none)   | `STATUS`        |

use serde::Deserialize;
use std::str::FromStr;

use super::command::{RelayCommand, RelayKey};
use crate::error::PodBridgeError;

/// Spelling of commands written to the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandDialect {
    /// Single-character tokens, `A`..`D` / `a`..`d`
    #[default]
    Letter,
    /// Word commands, `RELAYx_ON` / `RELAYx_OFF` / `ALL_ON` / `ALL_OFF` / `STATUS`
    Named,
}

impl FromStr for CommandDialect {
    type Err = PodBridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "letter" => Ok(CommandDialect::Letter),
            "named" => Ok(CommandDialect::Named),
            other => Err(PodBridgeError::InvalidCommand(format!(
                "unknown command dialect: {:?} (expected \"letter\" or \"named\")",
                other
            ))),
        }
    }
}

/// A command destined for the device, before dialect encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Relay(RelayCommand),
    AllOn,
    AllOff,
    Status,
}

impl DeviceCommand {
    /// Encode into the lines to write upstream, without terminators
    ///
    /// The letter dialect has no bulk or status commands: bulk commands
    /// expand to one token per relay and a status request encodes to nothing.
    pub fn encode(self, dialect: CommandDialect) -> Vec<String> {
        match (dialect, self) {
            (CommandDialect::Letter, DeviceCommand::Relay(cmd)) => vec![cmd.token().to_string()],
            (CommandDialect::Letter, DeviceCommand::AllOn) => all_tokens(true),
            (CommandDialect::Letter, DeviceCommand::AllOff) => all_tokens(false),
            (CommandDialect::Letter, DeviceCommand::Status) => Vec::new(),
            (CommandDialect::Named, DeviceCommand::Relay(cmd)) => vec![format!(
                "RELAY{}_{}",
                cmd.key.letter(),
                if cmd.on { "ON" } else { "OFF" }
            )],
            (CommandDialect::Named, DeviceCommand::AllOn) => vec!["ALL_ON".to_string()],
            (CommandDialect::Named, DeviceCommand::AllOff) => vec!["ALL_OFF".to_string()],
            (CommandDialect::Named, DeviceCommand::Status) => vec!["STATUS".to_string()],
        }
    }
}

fn all_tokens(on: bool) -> Vec<String> {
    RelayKey::ALL
        .into_iter()
        .map(|key| RelayCommand::new(key, on).token().to_string())
        .collect()
}
