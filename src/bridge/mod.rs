//! # Bridge Module
//!
//! Multiplexes one upstream device link to any number of subscribers.
//!
//! This module handles:
//! - Owning the single upstream connection and reopening it after failures
//! - Framing device bytes into lines and routing them (telemetry / relay state)
//! - Broadcasting normalized frames to subscribers, late joiners first
//! - Writing subscriber relay commands upstream

pub mod command;
pub mod line;
pub mod registry;
pub mod transport;

pub use command::{parse_client_message, ClientCommand};
pub use line::{classify_line, LineFramer, UpstreamLine};
pub use registry::{Outbound, SubscriberId, SubscriberRegistry, Subscription};
pub use transport::{Bridge, BridgeSettings, ConnectionState};
