//! Upload progress accounting

use serde::{Deserialize, Serialize};

/// Upload progress as seen by the transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Progress percentage (0-100), never decreases within a transfer
    pub percent: u8,

    /// Set once every byte of the payload has been handed to the connection
    pub data_fully_sent: bool,
}

impl TransferProgress {
    pub fn is_complete(&self) -> bool {
        self.percent >= 100
    }
}

/// Turns raw byte counts into monotonic [`TransferProgress`] updates
///
/// Owned by the transport; everything else only sees the values it emits.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: u64,
    current: TransferProgress,
    started: bool,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            current: TransferProgress::default(),
            started: false,
        }
    }

    /// Record that `sent` bytes have gone out so far
    ///
    /// Returns the new progress when the percentage moved forward (or on the
    /// very first observation), `None` for duplicates and stale counts.
    pub fn observe(&mut self, sent: u64) -> Option<TransferProgress> {
        let percent = if self.total == 0 {
            100
        } else {
            (sent.min(self.total) * 100 / self.total) as u8
        };

        if self.started && percent <= self.current.percent {
            return None;
        }
        self.started = true;
        self.current.percent = percent;
        if percent >= 100 {
            self.current.data_fully_sent = true;
        }
        Some(self.current)
    }

    pub fn current(&self) -> TransferProgress {
        self.current
    }
}
