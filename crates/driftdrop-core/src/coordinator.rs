//! Rendezvous coordinator.
//!
//! Translates registry outcomes into notifications on the message bus.
//! The coordinator owns the registry by handle; there is no process-wide
//! session storage. Delivery is fire-and-forget and at-least-once, so every
//! notification is idempotent on receipt.
//!
//! # Guarantees
//!
//! - Exactly one `DownloadRequested` to the owner per successful request
//! - Owner-id fan-out reaches **all current** receivers, not just the latest
//! - Exactly one `ShareEnded` per member on owner disconnect, after which
//!   the session is irrevocably gone
//! - Exactly one `ReceiverDisconnected` to the owner per receiver drop

use crate::error::Result;
use crate::protocol::Notification;
use crate::registry::{DisconnectEvent, SessionRegistry};
use crate::session::{ConnectionId, FileMetadata, RendezvousId, ShareId};
use std::time::Duration;

/// Delivers notifications to participants over the real-time bus.
///
/// Fire-and-forget: delivery to a connection that is already gone is the
/// bus's business, not the coordinator's.
pub trait MessageBus {
    /// Deliver one notification to one participant.
    fn deliver(&self, to: ConnectionId, notification: Notification);
}

/// Reply to a join-share request.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinReply {
    /// Whether the join succeeded.
    pub ok: bool,
    /// Human-readable status on failure.
    pub message: Option<String>,
    /// Current metadata, if the owner already published it.
    pub metadata: Option<FileMetadata>,
}

/// Consumes registry operations and emits notifications to participants.
pub struct Coordinator<B: MessageBus> {
    registry: SessionRegistry,
    bus: B,
}

impl<B: MessageBus> Coordinator<B> {
    /// Create a coordinator over an empty registry.
    pub fn new(bus: B) -> Self {
        Self {
            registry: SessionRegistry::new(),
            bus,
        }
    }

    /// Read access to the registry.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// The bus handle.
    #[must_use]
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Create a share owned by `owner`.
    pub fn create_share(&mut self, owner: ConnectionId) -> ShareId {
        let share_id = self.registry.create(owner);
        tracing::info!(%owner, %share_id, "share created");
        share_id
    }

    /// Join `receiver` to a share.
    ///
    /// The owner learns of the join; if the owner's rendezvous id is already
    /// known the joiner receives it immediately, so both join/publish
    /// interleavings converge.
    pub fn join_share(&mut self, receiver: ConnectionId, share_id: &ShareId) -> JoinReply {
        match self.registry.join(share_id, receiver) {
            Ok(outcome) => {
                tracing::info!(%receiver, %share_id, total = outcome.total_receivers, "receiver joined");
                self.bus.deliver(
                    outcome.owner,
                    Notification::ReceiverJoined {
                        receiver,
                        total_receivers: outcome.total_receivers,
                    },
                );
                if let Some(rendezvous_id) = outcome.owner_rendezvous {
                    self.bus
                        .deliver(receiver, Notification::OwnerRendezvousId { rendezvous_id });
                }
                JoinReply {
                    ok: true,
                    message: None,
                    metadata: outcome.metadata,
                }
            }
            Err(err) => {
                tracing::debug!(%receiver, %share_id, %err, "join rejected");
                JoinReply {
                    ok: false,
                    message: Some("share not found or expired".to_string()),
                    metadata: None,
                }
            }
        }
    }

    /// Record the owner's rendezvous id and fan it out to every current
    /// receiver. No-op for unknown sessions.
    pub fn publish_owner_id(&mut self, share_id: &ShareId, rendezvous_id: RendezvousId) {
        if let Some(fanout) = self
            .registry
            .publish_owner_rendezvous(share_id, rendezvous_id)
        {
            tracing::debug!(%share_id, receivers = fanout.receivers.len(), "owner rendezvous id published");
            for receiver in fanout.receivers {
                self.bus.deliver(
                    receiver,
                    Notification::OwnerRendezvousId {
                        rendezvous_id: fanout.rendezvous_id.clone(),
                    },
                );
            }
        }
    }

    /// Attach a rendezvous id to a receiver. No-op if either is missing.
    pub fn publish_receiver_id(
        &mut self,
        share_id: &ShareId,
        receiver: ConnectionId,
        rendezvous_id: RendezvousId,
    ) {
        self.registry
            .publish_receiver_rendezvous(share_id, receiver, rendezvous_id);
    }

    /// Publish metadata on behalf of `caller` and fan it out to receivers.
    pub fn publish_metadata(
        &mut self,
        caller: ConnectionId,
        share_id: &ShareId,
        metadata: FileMetadata,
    ) -> Result<()> {
        let fanout = self
            .registry
            .publish_metadata(share_id, caller, metadata)
            .inspect_err(|err| {
                tracing::warn!(%caller, %share_id, %err, "metadata publish rejected");
            })?;
        for receiver in fanout.receivers {
            self.bus.deliver(
                receiver,
                Notification::FileMetadata {
                    metadata: fanout.metadata.clone(),
                },
            );
        }
        Ok(())
    }

    /// Record a download request and notify the owner exactly once.
    pub fn request_download(
        &mut self,
        receiver: ConnectionId,
        share_id: &ShareId,
        rendezvous_id: RendezvousId,
    ) -> Result<()> {
        let outcome = self
            .registry
            .request_download(share_id, receiver, rendezvous_id)?;
        tracing::info!(%receiver, %share_id, "download requested");
        self.bus.deliver(
            outcome.owner,
            Notification::DownloadRequested {
                receiver: outcome.receiver,
                rendezvous_id: outcome.rendezvous_id,
            },
        );
        Ok(())
    }

    /// React to a connection going away.
    ///
    /// Owner disconnect ends the session: every member gets exactly one
    /// termination notification and the session is deleted. The registry
    /// does not close receiver channels; each side reacts to the signal
    /// independently.
    pub fn connection_closed(&mut self, conn: ConnectionId) {
        for event in self.registry.remove_connection(conn) {
            match event {
                DisconnectEvent::SessionEnded { share_id, members } => {
                    tracing::info!(%conn, %share_id, members = members.len(), "owner disconnected, share ended");
                    for member in members {
                        self.bus.deliver(
                            member,
                            Notification::ShareEnded {
                                message: "file sender disconnected".to_string(),
                            },
                        );
                    }
                }
                DisconnectEvent::ReceiverLeft {
                    share_id,
                    owner,
                    receiver,
                    remaining_receivers,
                } => {
                    tracing::info!(%receiver, %share_id, remaining = remaining_receivers, "receiver disconnected");
                    self.bus.deliver(
                        owner,
                        Notification::ReceiverDisconnected {
                            receiver,
                            total_receivers: remaining_receivers,
                        },
                    );
                }
            }
        }
    }

    /// End every session older than `max_age`, notifying each member once.
    pub fn expire_stale(&mut self, max_age: Duration) {
        for expired in self.registry.expire_older_than(max_age) {
            tracing::info!(share_id = %expired.share_id, "share expired");
            for member in expired.members {
                self.bus.deliver(member, Notification::ShareExpired);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const OWNER: ConnectionId = ConnectionId(1);
    const RECEIVER_A: ConnectionId = ConnectionId(2);
    const RECEIVER_B: ConnectionId = ConnectionId(3);

    #[derive(Default)]
    struct RecordingBus {
        delivered: RefCell<Vec<(ConnectionId, Notification)>>,
    }

    impl MessageBus for RecordingBus {
        fn deliver(&self, to: ConnectionId, notification: Notification) {
            self.delivered.borrow_mut().push((to, notification));
        }
    }

    impl RecordingBus {
        fn take(&self) -> Vec<(ConnectionId, Notification)> {
            std::mem::take(&mut self.delivered.borrow_mut())
        }
    }

    fn metadata() -> FileMetadata {
        FileMetadata {
            name: "track.flac".to_string(),
            size: 150,
            mime_type: "audio/flac".to_string(),
        }
    }

    #[test]
    fn test_join_notifies_owner() {
        let mut coordinator = Coordinator::new(RecordingBus::default());
        let share = coordinator.create_share(OWNER);
        let reply = coordinator.join_share(RECEIVER_A, &share);
        assert!(reply.ok);
        assert_eq!(
            coordinator.bus().take(),
            vec![(
                OWNER,
                Notification::ReceiverJoined {
                    receiver: RECEIVER_A,
                    total_receivers: 1,
                }
            )]
        );
    }

    #[test]
    fn test_join_unknown_share_is_rejected_with_message() {
        let mut coordinator = Coordinator::new(RecordingBus::default());
        let reply = coordinator.join_share(RECEIVER_A, &ShareId::from("missing"));
        assert!(!reply.ok);
        assert!(reply.message.is_some());
        assert!(coordinator.bus().take().is_empty());
    }

    #[test]
    fn test_join_after_owner_publish_gets_id_immediately() {
        let mut coordinator = Coordinator::new(RecordingBus::default());
        let share = coordinator.create_share(OWNER);
        coordinator.publish_owner_id(&share, RendezvousId::from("owner-peer"));
        coordinator.bus().take();

        coordinator.join_share(RECEIVER_A, &share);
        let delivered = coordinator.bus().take();
        assert!(delivered.contains(&(
            RECEIVER_A,
            Notification::OwnerRendezvousId {
                rendezvous_id: RendezvousId::from("owner-peer"),
            }
        )));
    }

    #[test]
    fn test_owner_publish_after_join_fans_out_to_all_receivers() {
        let mut coordinator = Coordinator::new(RecordingBus::default());
        let share = coordinator.create_share(OWNER);
        coordinator.join_share(RECEIVER_A, &share);
        coordinator.join_share(RECEIVER_B, &share);
        coordinator.bus().take();

        coordinator.publish_owner_id(&share, RendezvousId::from("owner-peer"));
        let delivered = coordinator.bus().take();
        let expected = Notification::OwnerRendezvousId {
            rendezvous_id: RendezvousId::from("owner-peer"),
        };
        assert_eq!(
            delivered,
            vec![
                (RECEIVER_A, expected.clone()),
                (RECEIVER_B, expected.clone()),
            ]
        );
    }

    #[test]
    fn test_metadata_before_join_arrives_in_reply_not_notification() {
        let mut coordinator = Coordinator::new(RecordingBus::default());
        let share = coordinator.create_share(OWNER);
        coordinator
            .publish_metadata(OWNER, &share, metadata())
            .unwrap();
        coordinator.bus().take();

        let reply = coordinator.join_share(RECEIVER_A, &share);
        assert_eq!(reply.metadata, Some(metadata()));
        let delivered = coordinator.bus().take();
        assert!(
            !delivered
                .iter()
                .any(|(_, n)| matches!(n, Notification::FileMetadata { .. }))
        );
    }

    #[test]
    fn test_metadata_after_join_arrives_as_single_notification() {
        let mut coordinator = Coordinator::new(RecordingBus::default());
        let share = coordinator.create_share(OWNER);
        let reply = coordinator.join_share(RECEIVER_A, &share);
        assert!(reply.metadata.is_none());
        coordinator.bus().take();

        coordinator
            .publish_metadata(OWNER, &share, metadata())
            .unwrap();
        let notifications: Vec<_> = coordinator
            .bus()
            .take()
            .into_iter()
            .filter(|(to, n)| *to == RECEIVER_A && matches!(n, Notification::FileMetadata { .. }))
            .collect();
        assert_eq!(notifications.len(), 1);
    }

    #[test]
    fn test_metadata_publish_by_non_owner_is_rejected() {
        let mut coordinator = Coordinator::new(RecordingBus::default());
        let share = coordinator.create_share(OWNER);
        coordinator.join_share(RECEIVER_A, &share);
        coordinator.bus().take();

        let result = coordinator.publish_metadata(RECEIVER_A, &share, metadata());
        assert!(result.is_err());
        assert!(coordinator.bus().take().is_empty());
    }

    #[test]
    fn test_request_download_notifies_owner_exactly_once() {
        let mut coordinator = Coordinator::new(RecordingBus::default());
        let share = coordinator.create_share(OWNER);
        coordinator.join_share(RECEIVER_A, &share);
        coordinator.bus().take();

        coordinator
            .request_download(RECEIVER_A, &share, RendezvousId::from("recv-peer"))
            .unwrap();
        let delivered = coordinator.bus().take();
        assert_eq!(
            delivered,
            vec![(
                OWNER,
                Notification::DownloadRequested {
                    receiver: RECEIVER_A,
                    rendezvous_id: RendezvousId::from("recv-peer"),
                }
            )]
        );
    }

    #[test]
    fn test_owner_disconnect_sends_one_termination_per_member() {
        let mut coordinator = Coordinator::new(RecordingBus::default());
        let share = coordinator.create_share(OWNER);
        coordinator.join_share(RECEIVER_A, &share);
        coordinator.join_share(RECEIVER_B, &share);
        coordinator.bus().take();

        coordinator.connection_closed(OWNER);
        let delivered = coordinator.bus().take();
        assert_eq!(delivered.len(), 3);
        for member in [OWNER, RECEIVER_A, RECEIVER_B] {
            let count = delivered
                .iter()
                .filter(|(to, n)| *to == member && matches!(n, Notification::ShareEnded { .. }))
                .count();
            assert_eq!(count, 1, "member {member} should get exactly one ShareEnded");
        }

        // The session is irrevocably gone
        assert!(!coordinator.join_share(RECEIVER_A, &share).ok);
    }

    #[test]
    fn test_receiver_disconnect_notifies_owner_once() {
        let mut coordinator = Coordinator::new(RecordingBus::default());
        let share = coordinator.create_share(OWNER);
        coordinator.join_share(RECEIVER_A, &share);
        coordinator.join_share(RECEIVER_B, &share);
        coordinator.bus().take();

        coordinator.connection_closed(RECEIVER_A);
        assert_eq!(
            coordinator.bus().take(),
            vec![(
                OWNER,
                Notification::ReceiverDisconnected {
                    receiver: RECEIVER_A,
                    total_receivers: 1,
                }
            )]
        );
        // The other receiver still belongs to the session
        assert_eq!(
            coordinator.registry().get(&share).unwrap().receivers().len(),
            1
        );
    }

    #[test]
    fn test_expiry_notifies_every_member_once() {
        let mut coordinator = Coordinator::new(RecordingBus::default());
        let share = coordinator.create_share(OWNER);
        coordinator.join_share(RECEIVER_A, &share);
        coordinator.bus().take();

        coordinator.expire_stale(Duration::ZERO);
        let delivered = coordinator.bus().take();
        assert_eq!(
            delivered,
            vec![
                (OWNER, Notification::ShareExpired),
                (RECEIVER_A, Notification::ShareExpired),
            ]
        );
        assert!(!coordinator.registry().contains(&share));
    }
}
