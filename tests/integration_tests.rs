//! Cross-crate integration tests.
//!
//! Exercises the full offer/join/request/transfer flow: coordination through
//! `driftdrop-core` and chunked delivery through `driftdrop-transfer`, wired
//! together over in-memory collaborators.

use driftdrop_core::coordinator::Coordinator;
use driftdrop_core::protocol::{Notification, TransferMessage};
use driftdrop_core::session::{ConnectionId, RendezvousId};
use driftdrop_integration_tests::{feed, test_metadata, PipeChannel, RecordingBus};
use driftdrop_transfer::chunker::PayloadChunker;
use driftdrop_transfer::reassembly::ChunkReassembler;
use driftdrop_transfer::sender::{ChunkSender, SendStep};
use driftdrop_transfer::{ShareProgress, TransferError};
use std::sync::Arc;

const OWNER: ConnectionId = ConnectionId(1);
const RECEIVER_A: ConnectionId = ConnectionId(2);
const RECEIVER_B: ConnectionId = ConnectionId(3);

/// Drive a sender to completion over an in-memory channel and reassemble
/// the result.
fn pump_transfer(payload: Vec<u8>, chunk_size: usize) -> Vec<u8> {
    let size = payload.len() as u64;
    let mut sender = ChunkSender::with_chunker(
        Arc::new(payload),
        test_metadata(size),
        PayloadChunker::with_chunk_size(chunk_size),
    );
    let mut channel = PipeChannel::default();
    let mut reassembler = ChunkReassembler::new();

    sender.start(&mut channel).unwrap();
    loop {
        let step = sender.on_ready(&mut channel).unwrap();
        if step == SendStep::Finished {
            break;
        }
    }

    let mut result = None;
    for message in channel.drain() {
        if let Some(payload) = feed(&mut reassembler, message).unwrap() {
            result = Some(payload);
        }
    }
    result.expect("transfer did not complete")
}

// ============================================================================
// End-to-end transfer
// ============================================================================

#[test]
fn test_payload_survives_chunked_transfer() {
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(pump_transfer(payload.clone(), 256), payload);
}

#[test]
fn test_150_byte_payload_over_100_byte_chunks() {
    let payload: Vec<u8> = (0..150).map(|i| i as u8).collect();
    let result = pump_transfer(payload.clone(), 100);
    assert_eq!(result.len(), 150);
    assert_eq!(result, payload);
}

#[test]
fn test_empty_payload_transfers() {
    assert!(pump_transfer(Vec::new(), 100).is_empty());
}

#[test]
fn test_out_of_order_delivery_reassembles_identically() {
    let payload: Vec<u8> = (0..300).map(|i| (i * 3) as u8).collect();
    let mut sender = ChunkSender::with_chunker(
        Arc::new(payload.clone()),
        test_metadata(300),
        PayloadChunker::with_chunk_size(100),
    );
    let mut channel = PipeChannel::default();
    sender.start(&mut channel).unwrap();
    while sender.on_ready(&mut channel).unwrap() != SendStep::Finished {}

    // Metadata first, completion last, chunks reversed in between
    let mut messages = channel.drain();
    messages[1..4].reverse();

    let mut reassembler = ChunkReassembler::new();
    let mut result = None;
    for message in messages {
        if let Some(assembled) = feed(&mut reassembler, message).unwrap() {
            result = Some(assembled);
        }
    }
    assert_eq!(result.unwrap(), payload);
}

#[test]
fn test_dropped_chunk_fails_the_transfer() {
    let mut sender = ChunkSender::with_chunker(
        Arc::new(vec![7u8; 300]),
        test_metadata(300),
        PayloadChunker::with_chunk_size(100),
    );
    let mut channel = PipeChannel::default();
    sender.start(&mut channel).unwrap();
    while sender.on_ready(&mut channel).unwrap() != SendStep::Finished {}

    let mut reassembler = ChunkReassembler::new();
    let mut failure = None;
    for message in channel.drain() {
        // Lose the middle chunk in transit
        if matches!(message, TransferMessage::Chunk { index: 1, .. }) {
            continue;
        }
        if let Err(err) = feed(&mut reassembler, message) {
            failure = Some(err);
        }
    }
    assert_eq!(
        failure,
        Some(TransferError::PartialTransfer { missing: 1, total: 3 })
    );
    assert!(reassembler.phase().is_closed());
}

// ============================================================================
// Coordination + transfer
// ============================================================================

#[test]
fn test_full_share_flow_from_offer_to_delivery() {
    let mut coordinator = Coordinator::new(RecordingBus::default());

    // Owner offers a file
    let share = coordinator.create_share(OWNER);
    coordinator.publish_owner_id(&share, RendezvousId::from("owner-peer"));
    coordinator
        .publish_metadata(OWNER, &share, test_metadata(300))
        .unwrap();
    coordinator.bus().take();

    // Receiver joins and learns the owner's rendezvous id plus metadata
    let reply = coordinator.join_share(RECEIVER_A, &share);
    assert!(reply.ok);
    assert_eq!(reply.metadata, Some(test_metadata(300)));
    let delivered = coordinator.bus().take();
    assert!(delivered.contains(&(
        RECEIVER_A,
        Notification::OwnerRendezvousId {
            rendezvous_id: RendezvousId::from("owner-peer"),
        }
    )));

    // Receiver asks for the file; owner is told where to connect
    coordinator
        .request_download(RECEIVER_A, &share, RendezvousId::from("recv-peer"))
        .unwrap();
    assert_eq!(
        coordinator.bus().take(),
        vec![(
            OWNER,
            Notification::DownloadRequested {
                receiver: RECEIVER_A,
                rendezvous_id: RendezvousId::from("recv-peer"),
            }
        )]
    );

    // Direct channel opens out of band; the payload flows over it
    let payload: Vec<u8> = (0..300).map(|i| i as u8).collect();
    assert_eq!(pump_transfer(payload.clone(), 100), payload);
}

#[test]
fn test_owner_disconnect_mid_transfer_abandons_receivers() {
    let mut coordinator = Coordinator::new(RecordingBus::default());
    let share = coordinator.create_share(OWNER);
    coordinator.join_share(RECEIVER_A, &share);
    coordinator.bus().take();

    // Receiver is mid-reassembly when the owner goes away
    let mut reassembler = ChunkReassembler::new();
    reassembler.on_metadata(test_metadata(300)).unwrap();
    reassembler.on_chunk(0, 3, vec![0u8; 100]).unwrap();

    coordinator.connection_closed(OWNER);
    let ended: Vec<_> = coordinator
        .bus()
        .take()
        .into_iter()
        .filter(|(_, n)| matches!(n, Notification::ShareEnded { .. }))
        .collect();
    assert_eq!(ended.len(), 2);

    // The receiver reacts by tearing down its half
    reassembler.on_channel_closed();
    assert!(matches!(
        reassembler.on_chunk(1, 3, vec![0u8; 100]),
        Err(TransferError::Closed)
    ));
    assert_eq!(reassembler.bytes_received(), 0);
}

// ============================================================================
// Multi-receiver progress
// ============================================================================

#[test]
fn test_one_payload_many_receivers_average_progress() {
    let payload = Arc::new(vec![4u8; 200]);
    let chunker = PayloadChunker::with_chunk_size(100);
    let mut sender_a = ChunkSender::with_chunker(payload.clone(), test_metadata(200), chunker);
    let mut sender_b = ChunkSender::with_chunker(payload.clone(), test_metadata(200), chunker);
    let mut channel_a = PipeChannel::default();
    let mut channel_b = PipeChannel::default();

    sender_a.start(&mut channel_a).unwrap();
    sender_b.start(&mut channel_b).unwrap();

    // A finishes both chunks, B has sent one of two
    while sender_a.on_ready(&mut channel_a).unwrap() != SendStep::Finished {}
    sender_b.on_ready(&mut channel_b).unwrap();

    let mut progress = ShareProgress::new();
    progress.update(RECEIVER_A, sender_a.percent());
    progress.update(RECEIVER_B, sender_b.percent());
    assert_eq!(sender_a.percent(), 100);
    assert_eq!(sender_b.percent(), 50);
    assert_eq!(progress.average(), Some(75));
}

#[test]
fn test_receiver_disconnect_shrinks_progress_denominator() {
    let mut coordinator = Coordinator::new(RecordingBus::default());
    let share = coordinator.create_share(OWNER);
    coordinator.join_share(RECEIVER_A, &share);
    coordinator.join_share(RECEIVER_B, &share);
    coordinator.bus().take();

    let mut progress = ShareProgress::new();
    progress.update(RECEIVER_A, 80);
    progress.update(RECEIVER_B, 20);
    assert_eq!(progress.average(), Some(50));

    // B drops mid-transfer: the session survives, the aggregate recomputes
    coordinator.connection_closed(RECEIVER_B);
    assert_eq!(
        coordinator.bus().take(),
        vec![(
            OWNER,
            Notification::ReceiverDisconnected {
                receiver: RECEIVER_B,
                total_receivers: 1,
            }
        )]
    );
    progress.remove(RECEIVER_B);
    assert_eq!(progress.active_receivers(), 1);
    assert_eq!(progress.average(), Some(80));
    assert!(coordinator.registry().contains(&share));
}
