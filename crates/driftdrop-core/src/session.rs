//! Share session state.
//!
//! A [`ShareSession`] is one file-offering context: exactly one owner, a set
//! of receivers, optional file metadata, and a lifecycle phase. Sessions are
//! owned exclusively by the registry and destroyed wholesale when the owner
//! disconnects or the session expires.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Identifier the coordination service assigns to a connected participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Out-of-band identifier exchanged via the coordination channel, used to
/// establish the direct channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RendezvousId(pub String);

impl RendezvousId {
    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RendezvousId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RendezvousId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Opaque share token handed to the owner on creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShareId(String);

impl ShareId {
    /// Generate a fresh high-entropy share id.
    #[must_use]
    pub fn generate() -> Self {
        use rand::Rng;
        let mut bytes = [0u8; crate::SHARE_ID_LEN];
        rand::thread_rng().fill(&mut bytes[..]);
        Self(hex::encode(bytes))
    }

    /// The token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShareId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// File metadata published by the owner.
///
/// Immutable once a transfer starts; before that, the latest publish wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// File name
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// MIME type
    pub mime_type: String,
}

/// Session lifecycle phase.
///
/// Replaces the nested open/data/close callbacks of ad-hoc implementations
/// with an explicit machine. Re-entering the current phase is legal:
/// notifications are at-least-once and duplicates must be tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Session exists; the owner's rendezvous id is not yet known.
    Created,
    /// The owner has published its rendezvous id.
    OwnerIdKnown,
    /// At least one receiver has requested the payload.
    DownloadRequested,
    /// Chunks are moving on a direct channel.
    Transferring,
    /// The completion marker has been exchanged.
    Completed,
    /// The session or channel is gone. Terminal.
    Closed,
}

impl SessionPhase {
    /// Whether `next` is a legal transition from this phase.
    #[must_use]
    pub fn can_advance(self, next: SessionPhase) -> bool {
        use SessionPhase::{Completed, Created, DownloadRequested, OwnerIdKnown, Transferring};
        if self == next {
            return true;
        }
        match (self, next) {
            (SessionPhase::Closed, _) => false,
            (_, SessionPhase::Closed) => true,
            // A download request may race ahead of the owner-id publish.
            (Created, OwnerIdKnown | DownloadRequested) => true,
            (OwnerIdKnown, DownloadRequested) => true,
            (DownloadRequested, Transferring) => true,
            (Transferring, Completed) => true,
            _ => false,
        }
    }

    /// Advance in place if the transition is legal.
    ///
    /// Returns `true` if the phase actually changed; a tolerated re-entry of
    /// the current phase returns `false`.
    pub fn advance(&mut self, next: SessionPhase) -> bool {
        if self.can_advance(next) {
            let changed = *self != next;
            *self = next;
            changed
        } else {
            false
        }
    }

    /// Whether this phase is terminal.
    #[must_use]
    pub fn is_closed(self) -> bool {
        self == SessionPhase::Closed
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Created => "created",
            SessionPhase::OwnerIdKnown => "owner-id-known",
            SessionPhase::DownloadRequested => "download-requested",
            SessionPhase::Transferring => "transferring",
            SessionPhase::Completed => "completed",
            SessionPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A receiver that joined a share.
#[derive(Debug, Clone)]
pub struct ReceiverRef {
    /// The receiver's coordination-channel connection.
    pub connection: ConnectionId,
    /// Rendezvous id, attached on publish or download request.
    pub rendezvous: Option<RendezvousId>,
}

/// One file-offering context.
#[derive(Debug, Clone)]
pub struct ShareSession {
    /// Unique opaque token.
    pub id: ShareId,
    /// The connection that created the session and holds the payload.
    pub owner: ConnectionId,
    /// The owner's rendezvous id, once published.
    pub owner_rendezvous: Option<RendezvousId>,
    /// Metadata for the offered file, once published.
    pub metadata: Option<FileMetadata>,
    /// Lifecycle phase.
    pub phase: SessionPhase,
    /// Creation time, used for expiry.
    pub created_at: Instant,
    receivers: Vec<ReceiverRef>,
}

impl ShareSession {
    /// Create a session with no receivers and no metadata.
    #[must_use]
    pub fn new(id: ShareId, owner: ConnectionId) -> Self {
        Self {
            id,
            owner,
            owner_rendezvous: None,
            metadata: None,
            phase: SessionPhase::Created,
            created_at: Instant::now(),
            receivers: Vec::new(),
        }
    }

    /// The current receiver set.
    #[must_use]
    pub fn receivers(&self) -> &[ReceiverRef] {
        &self.receivers
    }

    /// Connection ids of all current receivers.
    #[must_use]
    pub fn receiver_connections(&self) -> Vec<ConnectionId> {
        self.receivers.iter().map(|r| r.connection).collect()
    }

    /// Every member of the session: the owner first, then each receiver.
    ///
    /// Each connection appears exactly once.
    #[must_use]
    pub fn member_connections(&self) -> Vec<ConnectionId> {
        let mut members = Vec::with_capacity(1 + self.receivers.len());
        members.push(self.owner);
        for r in &self.receivers {
            if r.connection != self.owner {
                members.push(r.connection);
            }
        }
        members
    }

    /// Whether the connection is the owner or one of the receivers.
    #[must_use]
    pub fn is_member(&self, conn: ConnectionId) -> bool {
        self.owner == conn || self.receivers.iter().any(|r| r.connection == conn)
    }

    /// Time elapsed since creation.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Add a receiver. Idempotent: returns `false` if already joined.
    pub(crate) fn join(&mut self, conn: ConnectionId) -> bool {
        if self.receivers.iter().any(|r| r.connection == conn) {
            return false;
        }
        self.receivers.push(ReceiverRef {
            connection: conn,
            rendezvous: None,
        });
        true
    }

    /// Remove a receiver. Returns `false` if it was not a member.
    pub(crate) fn leave(&mut self, conn: ConnectionId) -> bool {
        let before = self.receivers.len();
        self.receivers.retain(|r| r.connection != conn);
        self.receivers.len() != before
    }

    pub(crate) fn receiver_mut(&mut self, conn: ConnectionId) -> Option<&mut ReceiverRef> {
        self.receivers.iter_mut().find(|r| r.connection == conn)
    }
}
