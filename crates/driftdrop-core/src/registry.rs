//! In-memory session registry.
//!
//! Pure state transitions over the share mapping. Side effects are returned
//! as outcome values for the coordinator to dispatch; the registry never
//! talks to the bus itself, which keeps every operation atomic over the
//! mapping with no partial-update visibility.

use crate::error::{RegistryError, Result};
use crate::session::{
    ConnectionId, FileMetadata, RendezvousId, SessionPhase, ShareId, ShareSession,
};
use std::collections::HashMap;
use std::time::Duration;

/// Outcome of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// The session owner, to be notified of the join.
    pub owner: ConnectionId,
    /// The owner's rendezvous id, if already published.
    pub owner_rendezvous: Option<RendezvousId>,
    /// Current metadata, if already published.
    pub metadata: Option<FileMetadata>,
    /// Receiver count after the join.
    pub total_receivers: usize,
    /// `false` if the receiver had already joined (idempotent re-join).
    pub newly_joined: bool,
}

/// Fan-out produced by an owner rendezvous publish.
#[derive(Debug, Clone)]
pub struct OwnerIdFanOut {
    /// The published id.
    pub rendezvous_id: RendezvousId,
    /// All current receivers, each of which must learn the id.
    pub receivers: Vec<ConnectionId>,
}

/// Fan-out produced by a metadata publish.
#[derive(Debug, Clone)]
pub struct MetadataFanOut {
    /// The published metadata.
    pub metadata: FileMetadata,
    /// All current receivers.
    pub receivers: Vec<ConnectionId>,
}

/// Outcome of a download request.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// The owner, to be notified exactly once.
    pub owner: ConnectionId,
    /// The requesting receiver.
    pub receiver: ConnectionId,
    /// The rendezvous id recorded for that receiver.
    pub rendezvous_id: RendezvousId,
}

/// Events produced when a connection goes away.
#[derive(Debug, Clone)]
pub enum DisconnectEvent {
    /// The connection owned this share; the session is gone.
    SessionEnded {
        /// The ended share.
        share_id: ShareId,
        /// Every member, owner included, exactly once each.
        members: Vec<ConnectionId>,
    },
    /// The connection was a receiver on this share.
    ReceiverLeft {
        /// The affected share.
        share_id: ShareId,
        /// The owner, to be notified exactly once.
        owner: ConnectionId,
        /// The departed receiver.
        receiver: ConnectionId,
        /// Receiver count after the removal.
        remaining_receivers: usize,
    },
}

/// A session removed because it outlived its TTL.
#[derive(Debug, Clone)]
pub struct ExpiredSession {
    /// The expired share.
    pub share_id: ShareId,
    /// Every member, owner included, exactly once each.
    pub members: Vec<ConnectionId>,
}

/// In-memory mapping from share id to session state.
///
/// The registry exclusively owns every [`ShareSession`]; callers mutate the
/// receiver set only through [`join`](Self::join) and the disconnect path.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<ShareId, ShareSession>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh share owned by `owner`. Never fails.
    pub fn create(&mut self, owner: ConnectionId) -> ShareId {
        // 128 bits of entropy makes a collision practically impossible, but
        // an issued id must never be reused within the process lifetime.
        let id = loop {
            let candidate = ShareId::generate();
            if !self.sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        self.sessions
            .insert(id.clone(), ShareSession::new(id.clone(), owner));
        id
    }

    /// Add `receiver` to the share. Idempotent.
    pub fn join(&mut self, share_id: &ShareId, receiver: ConnectionId) -> Result<JoinOutcome> {
        let session = self
            .sessions
            .get_mut(share_id)
            .ok_or(RegistryError::NotFound)?;
        let newly_joined = session.join(receiver);
        Ok(JoinOutcome {
            owner: session.owner,
            owner_rendezvous: session.owner_rendezvous.clone(),
            metadata: session.metadata.clone(),
            total_receivers: session.receivers().len(),
            newly_joined,
        })
    }

    /// Record the owner's rendezvous id and return the fan-out to all
    /// current receivers.
    ///
    /// No-op (`None`) if the session is absent; duplicate and late publishes
    /// overwrite and are tolerated.
    pub fn publish_owner_rendezvous(
        &mut self,
        share_id: &ShareId,
        rendezvous_id: RendezvousId,
    ) -> Option<OwnerIdFanOut> {
        let session = self.sessions.get_mut(share_id)?;
        session.owner_rendezvous = Some(rendezvous_id.clone());
        session.phase.advance(SessionPhase::OwnerIdKnown);
        Some(OwnerIdFanOut {
            rendezvous_id,
            receivers: session.receiver_connections(),
        })
    }

    /// Attach a rendezvous id to the matching receiver.
    ///
    /// No-op if either the session or the receiver is missing.
    pub fn publish_receiver_rendezvous(
        &mut self,
        share_id: &ShareId,
        receiver: ConnectionId,
        rendezvous_id: RendezvousId,
    ) {
        if let Some(session) = self.sessions.get_mut(share_id) {
            if let Some(receiver_ref) = session.receiver_mut(receiver) {
                receiver_ref.rendezvous = Some(rendezvous_id);
            }
        }
    }

    /// Record metadata for the share. Latest publish wins.
    ///
    /// Applied only when `caller` is the owner; anyone else gets
    /// `Unauthorized` and the session is untouched.
    pub fn publish_metadata(
        &mut self,
        share_id: &ShareId,
        caller: ConnectionId,
        metadata: FileMetadata,
    ) -> Result<MetadataFanOut> {
        let session = self
            .sessions
            .get_mut(share_id)
            .ok_or(RegistryError::NotFound)?;
        if session.owner != caller {
            return Err(RegistryError::Unauthorized);
        }
        session.metadata = Some(metadata.clone());
        Ok(MetadataFanOut {
            metadata,
            receivers: session.receiver_connections(),
        })
    }

    /// Record a download request from `receiver` and return the owner for
    /// notification.
    ///
    /// The rendezvous id is recorded on the receiver's entry so the request
    /// survives even when it races ahead of the owner-id publish; a receiver
    /// whose request arrives before its own join is added on the spot.
    pub fn request_download(
        &mut self,
        share_id: &ShareId,
        receiver: ConnectionId,
        rendezvous_id: RendezvousId,
    ) -> Result<DownloadOutcome> {
        let session = self
            .sessions
            .get_mut(share_id)
            .ok_or(RegistryError::NotFound)?;
        session.join(receiver);
        if let Some(receiver_ref) = session.receiver_mut(receiver) {
            receiver_ref.rendezvous = Some(rendezvous_id.clone());
        }
        session.phase.advance(SessionPhase::DownloadRequested);
        Ok(DownloadOutcome {
            owner: session.owner,
            receiver,
            rendezvous_id,
        })
    }

    /// Remove a connection from every session it participates in.
    ///
    /// Sessions owned by the connection end wholesale: every member appears
    /// exactly once in the termination list and the session id resolves to
    /// `NotFound` afterwards. Receiver membership elsewhere is dropped with
    /// one removal event for the owner.
    pub fn remove_connection(&mut self, conn: ConnectionId) -> Vec<DisconnectEvent> {
        let mut events = Vec::new();

        let owned: Vec<ShareId> = self
            .sessions
            .values()
            .filter(|s| s.owner == conn)
            .map(|s| s.id.clone())
            .collect();
        for share_id in owned {
            if let Some(mut session) = self.sessions.remove(&share_id) {
                session.phase.advance(SessionPhase::Closed);
                events.push(DisconnectEvent::SessionEnded {
                    share_id,
                    members: session.member_connections(),
                });
            }
        }

        for session in self.sessions.values_mut() {
            if session.leave(conn) {
                events.push(DisconnectEvent::ReceiverLeft {
                    share_id: session.id.clone(),
                    owner: session.owner,
                    receiver: conn,
                    remaining_receivers: session.receivers().len(),
                });
            }
        }

        events
    }

    /// Remove every session older than `max_age`.
    pub fn expire_older_than(&mut self, max_age: Duration) -> Vec<ExpiredSession> {
        let expired: Vec<ShareId> = self
            .sessions
            .values()
            .filter(|s| s.age() >= max_age)
            .map(|s| s.id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|share_id| {
                self.sessions.remove(&share_id).map(|mut session| {
                    session.phase.advance(SessionPhase::Closed);
                    ExpiredSession {
                        share_id,
                        members: session.member_connections(),
                    }
                })
            })
            .collect()
    }

    /// Look up a session.
    #[must_use]
    pub fn get(&self, share_id: &ShareId) -> Option<&ShareSession> {
        self.sessions.get(share_id)
    }

    /// Whether a session exists for the id.
    #[must_use]
    pub fn contains(&self, share_id: &ShareId) -> bool {
        self.sessions.contains_key(share_id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
