//! # Upstream Line Framing
//!
//! The device sends newline-delimited UTF-8 text. Each line is either a
//! JSON telemetry object or a `STATE:` relay status line; anything else is
//! noise from the firmware and is dropped.

use bytes::BytesMut;
use serde_json::Value;

use crate::error::{PodBridgeError, Result};
use crate::relay::command::{parse_state_line, STATE_LINE_MARKER};

/// Longest line kept before the buffer is discarded as garbage
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// One classified line from the device
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamLine {
    /// JSON telemetry payload
    Telemetry(Value),
    /// Relay flags from a `STATE:` line, order A, B, C, D
    State([bool; 4]),
    /// Anything else
    Ignored,
}

/// Classify one line (without its terminator)
///
/// # Errors
///
/// Returns a decode error for a `{` line that is not valid JSON, or a
/// malformed `STATE:` line
pub fn classify_line(line: &str) -> Result<UpstreamLine> {
    let line = line.trim();

    if line.starts_with('{') {
        let value = serde_json::from_str(line)
            .map_err(|e| PodBridgeError::Decode(format!("invalid telemetry JSON: {}", e)))?;
        return Ok(UpstreamLine::Telemetry(value));
    }

    if line.contains(STATE_LINE_MARKER) {
        return parse_state_line(line).map(UpstreamLine::State);
    }

    Ok(UpstreamLine::Ignored)
}

/// Splits a byte stream into lines
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: BytesMut,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Buffer to read device bytes into
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Next complete line, trimmed, with invalid UTF-8 replaced
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let raw = self.buf.split_to(pos + 1);
        Some(String::from_utf8_lossy(&raw).trim().to_string())
    }

    /// Drop a partial line that has grown past [`MAX_LINE_LEN`]
    ///
    /// Call after draining [`next_line`](Self::next_line).
    ///
    /// # Returns
    ///
    /// * `bool` - Whether bytes were discarded
    pub fn discard_oversized(&mut self) -> bool {
        if self.buf.len() > MAX_LINE_LEN {
            self.buf.clear();
            true
        } else {
            false
        }
    }

    /// Bytes of an incomplete line still buffered
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
