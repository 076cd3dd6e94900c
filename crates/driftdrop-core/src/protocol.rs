//! Wire messages for the coordination channel and the direct channel.
//!
//! Coordination messages rendezvous participants before a direct channel
//! exists; [`TransferMessage`] is the application framing on the direct
//! channel once it is open. All notifications are delivered at-least-once
//! and must be idempotent on receipt.

use crate::session::{ConnectionId, FileMetadata, RendezvousId, ShareId};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Requests a participant sends to the coordination service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CoordRequest {
    /// Announce a new connection; the service replies with a `Welcome`.
    Hello,

    /// Create a new share; the caller becomes its owner.
    CreateShare,

    /// Join an existing share as a receiver.
    JoinShare {
        /// The share to join.
        share_id: ShareId,
    },

    /// Publish the owner's rendezvous id (fire-and-forget).
    PublishOwnerId {
        /// The owner's share.
        share_id: ShareId,
        /// Identifier receivers use to reach the owner directly.
        rendezvous_id: RendezvousId,
    },

    /// Publish a receiver's rendezvous id (fire-and-forget).
    PublishReceiverId {
        /// The joined share.
        share_id: ShareId,
        /// Identifier the owner uses to reach this receiver directly.
        rendezvous_id: RendezvousId,
    },

    /// Publish file metadata. Owner-only; fans out to all receivers.
    PublishMetadata {
        /// The owner's share.
        share_id: ShareId,
        /// Metadata for the offered file.
        metadata: FileMetadata,
    },

    /// Ask the owner to start a transfer toward the calling receiver.
    RequestDownload {
        /// The joined share.
        share_id: ShareId,
        /// The receiver's rendezvous id, recorded with the request.
        rendezvous_id: RendezvousId,
    },

    /// Leave the coordination service.
    Goodbye,
}

/// Responses the coordination service sends back to the requesting
/// participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CoordResponse {
    /// Reply to `Hello`.
    Welcome {
        /// The identity assigned to this connection.
        connection_id: ConnectionId,
    },

    /// Reply to `CreateShare`.
    ShareCreated {
        /// Token the owner distributes to receivers.
        share_id: ShareId,
    },

    /// Reply to `JoinShare`.
    JoinResult {
        /// Whether the join succeeded.
        ok: bool,
        /// Human-readable status on failure.
        message: Option<String>,
        /// Current metadata, if the owner already published it.
        metadata: Option<FileMetadata>,
    },

    /// A request failed; carries a human-readable status so the participant
    /// is never left with stale state.
    Error {
        /// What went wrong.
        message: String,
    },
}

/// Notifications pushed from the coordination service to participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Notification {
    /// A receiver joined the share (sent to the owner).
    ReceiverJoined {
        /// The joining receiver.
        receiver: ConnectionId,
        /// Receiver count after the join.
        total_receivers: usize,
    },

    /// A receiver disconnected (sent to the owner).
    ReceiverDisconnected {
        /// The departed receiver.
        receiver: ConnectionId,
        /// Receiver count after the removal.
        total_receivers: usize,
    },

    /// The session ended; sent exactly once to every member.
    ShareEnded {
        /// Human-readable reason.
        message: String,
    },

    /// The session outlived its TTL; sent exactly once to every member.
    ShareExpired,

    /// The owner's rendezvous id became known (sent to receivers).
    OwnerRendezvousId {
        /// Identifier to reach the owner directly.
        rendezvous_id: RendezvousId,
    },

    /// The owner published file metadata (sent to receivers).
    FileMetadata {
        /// The published metadata.
        metadata: FileMetadata,
    },

    /// A receiver requested the payload (sent to the owner).
    DownloadRequested {
        /// The requesting receiver.
        receiver: ConnectionId,
        /// Identifier to reach that receiver directly.
        rendezvous_id: RendezvousId,
    },
}

/// Envelope for service-to-participant datagrams.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ServerMessage {
    /// Reply to a request from this participant.
    Response(CoordResponse),
    /// Unsolicited notification.
    Notification(Notification),
}

/// Messages exchanged on the direct channel once it is open.
///
/// `Metadata` is always the first application message and `Complete` always
/// the last; the channel is assumed reliable and ordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TransferMessage {
    /// Describes the payload about to be streamed.
    Metadata(FileMetadata),

    /// One bounded slice of the payload.
    Chunk {
        /// Zero-based chunk index.
        index: u64,
        /// Authoritative total chunk count for this transfer.
        total: u64,
        /// The slice bytes.
        bytes: Vec<u8>,
    },

    /// All chunks have been sent.
    Complete,
}

impl TransferMessage {
    /// Get the message type name.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            TransferMessage::Metadata(_) => "Metadata",
            TransferMessage::Chunk { .. } => "Chunk",
            TransferMessage::Complete => "Complete",
        }
    }
}

/// Wire codec errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Message could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// Datagram could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    bincode::serialize(value).map_err(|e| WireError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    bincode::deserialize(bytes).map_err(|e| WireError::Decode(e.to_string()))
}

impl CoordRequest {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        encode(self)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        decode(bytes)
    }
}

impl ServerMessage {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        encode(self)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        decode(bytes)
    }
}

impl TransferMessage {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        encode(self)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        decode(bytes)
    }
}
