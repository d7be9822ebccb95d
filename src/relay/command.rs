//! # Relay Command Protocol
//!
//! Relay keys, the single-character wire command and the four-relay state
//! snapshot, plus parsing of the device's `STATE:` status line.

use serde::Serialize;
use std::fmt;

use crate::error::{PodBridgeError, Result};

/// Marker that precedes the relay flags in a device status line
pub const STATE_LINE_MARKER: &str = "STATE:";

/// One of the four independently addressable relays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayKey {
    /// Low-voltage subsystem
    A,
    /// Pod main power
    B,
    /// Launchpad interlock
    C,
    /// Inverter
    D,
}

impl RelayKey {
    /// All relays in declaration order (the order of `STATE:` flags)
    pub const ALL: [RelayKey; 4] = [RelayKey::A, RelayKey::B, RelayKey::C, RelayKey::D];

    /// Position of this relay in declaration order
    pub fn index(self) -> usize {
        match self {
            RelayKey::A => 0,
            RelayKey::B => 1,
            RelayKey::C => 2,
            RelayKey::D => 3,
        }
    }

    /// Uppercase letter naming this relay
    pub fn letter(self) -> char {
        match self {
            RelayKey::A => 'A',
            RelayKey::B => 'B',
            RelayKey::C => 'C',
            RelayKey::D => 'D',
        }
    }

    /// Human-readable subsystem name
    pub fn label(self) -> &'static str {
        match self {
            RelayKey::A => "LV subsystem",
            RelayKey::B => "pod main power",
            RelayKey::C => "launchpad interlock",
            RelayKey::D => "inverter",
        }
    }

    /// Look up a relay by letter, ignoring case
    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' => Some(RelayKey::A),
            'B' => Some(RelayKey::B),
            'C' => Some(RelayKey::C),
            'D' => Some(RelayKey::D),
            _ => None,
        }
    }
}

impl fmt::Display for RelayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// A single relay command: uppercase letter turns the relay ON, lowercase OFF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelayCommand {
    pub key: RelayKey,
    pub on: bool,
}

impl RelayCommand {
    pub fn new(key: RelayKey, on: bool) -> Self {
        Self { key, on }
    }

    /// Wire token for this command
    pub fn token(self) -> char {
        if self.on {
            self.key.letter()
        } else {
            self.key.letter().to_ascii_lowercase()
        }
    }

    /// Parse a single-character token (`A`..`D`, `a`..`d`)
    pub fn from_token(token: char) -> Option<Self> {
        let key = RelayKey::from_letter(token)?;
        Some(Self::new(key, token.is_ascii_uppercase()))
    }
}

impl fmt::Display for RelayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// ON/OFF state of all four relays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayState {
    #[serde(rename = "A")]
    pub a: bool,
    #[serde(rename = "B")]
    pub b: bool,
    #[serde(rename = "C")]
    pub c: bool,
    #[serde(rename = "D")]
    pub d: bool,
}

impl RelayState {
    /// Build a state from flags in declaration order A, B, C, D
    pub fn from_flags(flags: [bool; 4]) -> Self {
        Self {
            a: flags[0],
            b: flags[1],
            c: flags[2],
            d: flags[3],
        }
    }

    /// Flags in declaration order A, B, C, D
    pub fn flags(&self) -> [bool; 4] {
        [self.a, self.b, self.c, self.d]
    }

    pub fn get(&self, key: RelayKey) -> bool {
        self.flags()[key.index()]
    }

    pub fn set(&mut self, key: RelayKey, on: bool) {
        match key {
            RelayKey::A => self.a = on,
            RelayKey::B => self.b = on,
            RelayKey::C => self.c = on,
            RelayKey::D => self.d = on,
        }
    }

    /// Relays currently ON, in declaration order
    pub fn energized(&self) -> Vec<RelayKey> {
        RelayKey::ALL.into_iter().filter(|k| self.get(*k)).collect()
    }
}

/// Where the tracked relay state last came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateSource {
    /// Assumed from commands we sent; the device has not confirmed it
    #[default]
    Optimistic,
    /// Reported by the device itself
    Authoritative,
}

/// Parse a device status line of the form `STATE:b0,b1,b2,b3`
///
/// Anything before the marker is ignored. Each flag must be `0` or `1`.
///
/// # Arguments
///
/// * `line` - One line received from the device
///
/// # Returns
///
/// * `Result<[bool; 4]>` - Relay flags in order A, B, C, D
///
/// # Errors
///
/// Returns a decode error if the marker is missing, there are not exactly
/// four flags, or a flag is not `0`/`1`
pub fn parse_state_line(line: &str) -> Result<[bool; 4]> {
    let (_, rest) = line
        .split_once(STATE_LINE_MARKER)
        .ok_or_else(|| PodBridgeError::Decode(format!("missing {} marker", STATE_LINE_MARKER)))?;

    let tokens: Vec<&str> = rest.trim().split(',').map(str::trim).collect();
    if tokens.len() != 4 {
        return Err(PodBridgeError::Decode(format!(
            "expected 4 relay flags, got {}",
            tokens.len()
        )));
    }

    let mut flags = [false; 4];
    for (flag, token) in flags.iter_mut().zip(&tokens) {
        *flag = match *token {
            "1" => true,
            "0" => false,
            other => {
                return Err(PodBridgeError::Decode(format!("invalid relay flag: {:?}", other)));
            }
        };
    }

    Ok(flags)
}
