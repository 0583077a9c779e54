// src/frame_buffer.rs
//
// Bounded ring of timestamped frames. The acquisition thread pushes,
// the processing loop reads copies out. Nothing outside the buffer ever
// holds a reference into it.

use crate::types::Frame;
use std::collections::VecDeque;

pub struct FrameRingBuffer {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl FrameRingBuffer {
    /// `capacity` is clamped to at least one frame.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest when full.
    pub fn push(&mut self, frame: Frame) {
        if self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn latest(&self) -> Option<Frame> {
        self.frames.back().cloned()
    }

    /// Sequence id of the newest frame, without copying pixels.
    pub fn latest_sequence(&self) -> Option<u64> {
        self.frames.back().map(|f| f.sequence)
    }

    /// Frames stamped within `seconds` before `now`, oldest first.
    pub fn window(&self, now: f64, seconds: f64) -> Vec<Frame> {
        let cutoff = now - seconds;
        self.frames
            .iter()
            .filter(|f| f.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Frames stamped in `[start, end]`, oldest first.
    pub fn range(&self, start: f64, end: f64) -> Vec<Frame> {
        self.frames
            .iter()
            .filter(|f| f.timestamp >= start && f.timestamp <= end)
            .cloned()
            .collect()
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
}
