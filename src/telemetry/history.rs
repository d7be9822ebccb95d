//! # Frame History
//!
//! Bounded FIFO of recently normalized frames, oldest first.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use super::frame::TelemetryFrame;

/// Number of frames retained by default
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Recent frames in arrival order
#[derive(Debug, Clone)]
pub struct FrameHistory {
    frames: VecDeque<TelemetryFrame>,
    capacity: usize,
}

impl Default for FrameHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl FrameHistory {
    /// Create an empty history holding at most `capacity` frames
    ///
    /// A capacity of zero is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest once over capacity
    pub fn push(&mut self, frame: TelemetryFrame) {
        self.frames.push_back(frame);
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&TelemetryFrame> {
        self.frames.back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &TelemetryFrame> {
        self.frames.iter()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Age of the newest frame in milliseconds
    pub fn age_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        self.latest().and_then(|frame| frame.age_ms(now))
    }
}
