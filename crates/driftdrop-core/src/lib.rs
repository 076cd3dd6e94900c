//! # Driftdrop Core
//!
//! Rendezvous core for driftdrop.
//!
//! This crate provides:
//! - The in-memory session registry (share lifecycle, receiver fan-out)
//! - The rendezvous coordinator that turns registry outcomes into
//!   notifications on a message bus
//! - The per-session phase machine
//! - Wire messages for the coordination channel and the direct channel
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Coordinator                                │
//! │   (dispatches notifications to participants via MessageBus)     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                      SessionRegistry                             │
//! │   (pure state transitions over the share mapping)               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                       ShareSession                               │
//! │   (one owner, a set of receivers, metadata, phase)              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;

pub use coordinator::{Coordinator, JoinReply, MessageBus};
pub use error::{RegistryError, Result};
pub use protocol::{CoordRequest, CoordResponse, Notification, ServerMessage, TransferMessage, WireError};
pub use registry::SessionRegistry;
pub use session::{
    ConnectionId, FileMetadata, ReceiverRef, RendezvousId, SessionPhase, ShareId, ShareSession,
};

/// Length in bytes of the random token behind a share id.
pub const SHARE_ID_LEN: usize = 16;
