//! # Stream Flow Control
//!
//! Credit-based, per stream. A sender starts with the peer's pause-writer
//! threshold as credit, spends it on Stream frame payload and gets it back
//! through StreamConsumed frames. There is no connection-level window: total
//! buffering is bounded by stream limits times the per-stream threshold.

use thiserror::Error;

/// Peer exceeded its window or returned credit it was never given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("flow control limit of {limit} bytes exceeded")]
pub struct FlowControlError {
    pub limit: u64,
}

/// Send-side credit of one stream.
#[derive(Debug, Clone)]
pub struct SendCredit {
    /// Bytes that may be sent before waiting
    available: u64,

    /// Initial credit; `available` can never exceed it
    max: u64,
}

impl SendCredit {
    pub fn new(max: u64) -> Self {
        Self { available: max, max }
    }

    pub fn available(&self) -> u64 {
        self.available
    }

    /// Bytes sent and not yet acknowledged by a StreamConsumed frame.
    pub fn in_flight(&self) -> u64 {
        self.max - self.available
    }

    /// Spend credit for `bytes` of payload. Callers never spend more than
    /// [`available`](Self::available).
    pub fn consume(&mut self, bytes: u64) {
        debug_assert!(bytes <= self.available);
        self.available -= bytes.min(self.available);
    }

    /// Credit returned by the peer.
    pub fn restore(&mut self, bytes: u64) -> Result<(), FlowControlError> {
        match self.available.checked_add(bytes) {
            Some(available) if available <= self.max => {
                self.available = available;
                Ok(())
            }
            _ => Err(FlowControlError { limit: self.max }),
        }
    }
}

/// Receive-side window of one stream.
#[derive(Debug, Clone)]
pub struct RecvWindow {
    /// Credit granted to the peer (our pause-writer threshold)
    max: u64,

    /// Consumed bytes that trigger a StreamConsumed frame
    resume_threshold: u64,

    /// Bytes received and not yet returned to the peer
    unacknowledged: u64,

    /// Bytes consumed by the application since the last StreamConsumed
    consumed: u64,
}

impl RecvWindow {
    pub fn new(max: u64, resume_threshold: u64) -> Self {
        Self {
            max,
            resume_threshold: resume_threshold.clamp(1, max.max(1)),
            unacknowledged: 0,
            consumed: 0,
        }
    }

    /// Record `bytes` of payload arriving from the peer.
    pub fn on_data_received(&mut self, bytes: u64) -> Result<(), FlowControlError> {
        match self.unacknowledged.checked_add(bytes) {
            Some(total) if total <= self.max => {
                self.unacknowledged = total;
                Ok(())
            }
            _ => Err(FlowControlError { limit: self.max }),
        }
    }

    /// Record bytes taken by the application.
    ///
    /// Returns the size to announce in a StreamConsumed frame once enough
    /// bytes have been consumed since the previous announcement.
    pub fn consume(&mut self, bytes: u64) -> Option<u64> {
        self.consumed += bytes;
        if self.consumed < self.resume_threshold {
            return None;
        }
        let size = self.consumed;
        self.consumed = 0;
        self.unacknowledged -= size.min(self.unacknowledged);
        Some(size)
    }

    pub fn unacknowledged(&self) -> u64 {
        self.unacknowledged
    }
}
