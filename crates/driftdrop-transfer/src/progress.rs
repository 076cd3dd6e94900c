//! Progress accounting across receivers.

use driftdrop_core::session::ConnectionId;
use std::collections::HashMap;

/// Round a done/total ratio to a whole percentage.
///
/// An empty total counts as fully done.
#[must_use]
pub fn percent_complete(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as f64 / total as f64) * 100.0).round() as u8
}

/// Aggregate progress across a share's active receivers.
///
/// The aggregate is the arithmetic mean of each active receiver's percent,
/// recomputed on every change. The denominator shrinks when a receiver
/// completes or disconnects.
#[derive(Debug, Default)]
pub struct ShareProgress {
    receivers: HashMap<ConnectionId, u8>,
}

impl ShareProgress {
    /// Create an empty aggregate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a receiver's latest percent, adding the receiver if unknown.
    pub fn update(&mut self, receiver: ConnectionId, percent: u8) {
        self.receivers.insert(receiver, percent.min(100));
    }

    /// Drop a receiver from the aggregate (completed or disconnected).
    ///
    /// Returns `false` if the receiver was not being tracked.
    pub fn remove(&mut self, receiver: ConnectionId) -> bool {
        self.receivers.remove(&receiver).is_some()
    }

    /// Number of receivers still counted in the denominator.
    #[must_use]
    pub fn active_receivers(&self) -> usize {
        self.receivers.len()
    }

    /// Mean percent across active receivers; `None` when none are active.
    #[must_use]
    pub fn average(&self) -> Option<u8> {
        if self.receivers.is_empty() {
            return None;
        }
        let sum: u32 = self.receivers.values().map(|&p| u32::from(p)).sum();
        Some((f64::from(sum) / self.receivers.len() as f64).round() as u8)
    }
}
