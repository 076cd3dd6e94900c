//! Error types for the transfer engine.

use thiserror::Error;

/// Direct-channel failure reported by the transport collaborator.
///
/// Isolated to one receiver's channel: it tears down that receiver's
/// transfer state, never the session or other receivers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("channel error: {0}")]
pub struct ChannelError(pub String);

impl ChannelError {
    /// Create a channel error from any displayable cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Transfer-level errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The direct channel failed mid-transfer.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The completion marker arrived while slots were still unfilled.
    #[error("partial transfer: {missing} of {total} chunks missing at completion")]
    PartialTransfer {
        /// Number of unfilled slots.
        missing: usize,
        /// Total expected chunks.
        total: usize,
    },

    /// A message arrived out of protocol order.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// Operation on a transfer whose channel is already closed.
    #[error("transfer already closed")]
    Closed,
}
