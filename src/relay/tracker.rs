//! # Relay State Tracker
//!
//! Owns the locally tracked ON/OFF state of the four relays and turns
//! high-level intents into relay commands.
//!
//! Every mutation is optimistic: the state changes as soon as the command is
//! produced, without waiting for the device. A later authoritative report
//! (`STATE:` line or `relayStates` object) replaces all four flags at once.
//!
//! The tracker itself is not synchronized. The bridge keeps it behind a
//! single mutex so toggles from concurrent subscribers never read a stale
//! value.

use tracing::debug;

use super::command::{RelayCommand, RelayKey, RelayState, StateSource};

/// Fixed shutdown order: LV off, inverter off, pod off, launchpad off
pub const EMERGENCY_STOP_ORDER: [RelayCommand; 4] = [
    RelayCommand { key: RelayKey::A, on: false },
    RelayCommand { key: RelayKey::D, on: false },
    RelayCommand { key: RelayKey::B, on: false },
    RelayCommand { key: RelayKey::C, on: false },
];

/// Fixed resume order: inverter on, LV on, pod on, launchpad off
pub const RESUME_ORDER: [RelayCommand; 4] = [
    RelayCommand { key: RelayKey::D, on: true },
    RelayCommand { key: RelayKey::A, on: true },
    RelayCommand { key: RelayKey::B, on: true },
    RelayCommand { key: RelayKey::C, on: false },
];

/// Locally tracked relay state
#[derive(Debug, Clone, Default)]
pub struct RelayTracker {
    state: RelayState,
    source: StateSource,
}

impl RelayTracker {
    /// Create a tracker with every relay OFF
    pub fn new() -> Self {
        Self::default()
    }

    /// Current relay state snapshot
    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Where the current state came from
    pub fn source(&self) -> StateSource {
        self.source
    }

    /// Flip one relay
    ///
    /// # Returns
    ///
    /// * `RelayCommand` - Command encoding the new state (uppercase if now ON)
    pub fn toggle(&mut self, key: RelayKey) -> RelayCommand {
        let desired = !self.state.get(key);
        self.set(key, desired)
    }

    /// Set one relay explicitly
    ///
    /// # Returns
    ///
    /// * `RelayCommand` - Command encoding the requested state
    pub fn set(&mut self, key: RelayKey, on: bool) -> RelayCommand {
        self.apply(RelayCommand::new(key, on))
    }

    /// Apply a command received as-is from a subscriber
    pub fn apply(&mut self, command: RelayCommand) -> RelayCommand {
        self.state.set(command.key, command.on);
        self.source = StateSource::Optimistic;
        debug!("Relay {} -> {} (optimistic)", command.key, on_off(command.on));
        command
    }

    /// Overwrite all four relays with the device's own report
    ///
    /// # Arguments
    ///
    /// * `flags` - Relay flags in declaration order A, B, C, D
    pub fn apply_authoritative(&mut self, flags: [bool; 4]) {
        self.state = RelayState::from_flags(flags);
        self.source = StateSource::Authoritative;
        debug!("Relay state overwritten by device: {:?}", flags);
    }

    /// Shut everything down in the fixed emergency order `a, d, b, c`
    ///
    /// Produces the same four commands regardless of the current state.
    pub fn emergency_stop_sequence(&mut self) -> Vec<RelayCommand> {
        EMERGENCY_STOP_ORDER.iter().map(|cmd| self.apply(*cmd)).collect()
    }

    /// Bring the pod back up in the fixed order `D, A, B, c`
    pub fn resume_sequence(&mut self) -> Vec<RelayCommand> {
        RESUME_ORDER.iter().map(|cmd| self.apply(*cmd)).collect()
    }

    /// Turn every relay ON, in declaration order
    pub fn all_on(&mut self) -> Vec<RelayCommand> {
        RelayKey::ALL.into_iter().map(|key| self.set(key, true)).collect()
    }

    /// Turn every relay OFF, in declaration order
    pub fn all_off(&mut self) -> Vec<RelayCommand> {
        RelayKey::ALL.into_iter().map(|key| self.set(key, false)).collect()
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "ON" } else { "OFF" }
}
