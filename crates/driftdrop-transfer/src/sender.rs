//! Owner-side transfer orchestration, one instance per receiver.
//!
//! A [`ChunkSender`] is created when the direct channel to one receiver
//! opens and destroyed on completion or channel close. It paces chunk
//! delivery on the channel's availability signals: one slice per signal,
//! metadata strictly first, exactly one completion marker strictly last.

use crate::chunker::PayloadChunker;
use crate::error::{ChannelError, TransferError};
use crate::progress::percent_complete;
use driftdrop_core::protocol::TransferMessage;
use driftdrop_core::session::{FileMetadata, SessionPhase};
use std::sync::Arc;

/// Outbound half of an established direct channel.
///
/// The channel is assumed reliable and ordered; errors are surfaced to the
/// caller, never retried here.
pub trait DirectChannel {
    /// Send one application message.
    fn send(&mut self, message: TransferMessage) -> Result<(), ChannelError>;
}

/// Hook for observing per-receiver transfer events.
///
/// The default implementations do nothing. Retry policies plug in at
/// [`on_send_failed`](Self::on_send_failed); the sender itself never
/// retries.
pub trait TransferObserver {
    /// Progress changed for this receiver.
    fn on_progress(&mut self, percent: u8) {
        let _ = percent;
    }

    /// A send failed at the given chunk index.
    fn on_send_failed(&mut self, index: u64, error: &ChannelError) {
        let _ = (index, error);
    }
}

/// What one availability signal produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStep {
    /// One chunk went out.
    Sent {
        /// Index of the chunk that was sent.
        index: u64,
        /// Progress after this chunk.
        percent: u8,
    },
    /// The final slice is out and the completion marker was sent.
    Finished,
    /// Nothing left to schedule.
    Idle,
}

/// Paces chunk delivery to a single receiver over an open direct channel.
pub struct ChunkSender {
    payload: Arc<Vec<u8>>,
    metadata: FileMetadata,
    chunker: PayloadChunker,
    next_index: u64,
    total: u64,
    percent: u8,
    phase: SessionPhase,
    observer: Option<Box<dyn TransferObserver>>,
}

impl ChunkSender {
    /// Create a sender with the default chunk size.
    ///
    /// The payload is shared, not copied: every receiver's sender holds the
    /// same allocation.
    #[must_use]
    pub fn new(payload: Arc<Vec<u8>>, metadata: FileMetadata) -> Self {
        Self::with_chunker(payload, metadata, PayloadChunker::new())
    }

    /// Create a sender with a custom chunker.
    #[must_use]
    pub fn with_chunker(
        payload: Arc<Vec<u8>>,
        metadata: FileMetadata,
        chunker: PayloadChunker,
    ) -> Self {
        let total = chunker.chunk_count(payload.len() as u64);
        Self {
            payload,
            metadata,
            chunker,
            next_index: 0,
            total,
            percent: 0,
            phase: SessionPhase::DownloadRequested,
            observer: None,
        }
    }

    /// Install an observer for progress and failure events.
    pub fn set_observer(&mut self, observer: Box<dyn TransferObserver>) {
        self.observer = Some(observer);
    }

    /// Send the metadata message. Must be called once, before any chunk.
    pub fn start<C: DirectChannel>(&mut self, channel: &mut C) -> Result<(), TransferError> {
        if self.phase == SessionPhase::Closed {
            return Err(TransferError::Closed);
        }
        if self.phase != SessionPhase::DownloadRequested {
            return Err(TransferError::Protocol("transfer already started"));
        }
        channel
            .send(TransferMessage::Metadata(self.metadata.clone()))
            .map_err(|e| self.surface_failure(self.next_index, e))?;
        self.phase.advance(SessionPhase::Transferring);
        tracing::debug!(total = self.total, size = self.metadata.size, "transfer started");
        Ok(())
    }

    /// Availability signal from the channel.
    ///
    /// Sends the next unsent slice, advancing the index and recomputing
    /// progress. After the final slice it sends exactly one completion
    /// marker, never before. A failed send is surfaced to the observer and
    /// returned; the index does not advance.
    pub fn on_ready<C: DirectChannel>(&mut self, channel: &mut C) -> Result<SendStep, TransferError> {
        match self.phase {
            SessionPhase::Closed => return Err(TransferError::Closed),
            SessionPhase::Completed => return Ok(SendStep::Idle),
            SessionPhase::Transferring => {}
            _ => return Err(TransferError::Protocol("metadata not sent yet")),
        }

        if self.next_index >= self.total {
            // Empty payload, or a completion marker whose earlier send
            // failed; either way the final slice is already accounted for.
            return self.send_complete(channel);
        }

        let index = self.next_index;
        let bytes = self
            .chunker
            .slice(&self.payload, index)
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
        channel
            .send(TransferMessage::Chunk {
                index,
                total: self.total,
                bytes,
            })
            .map_err(|e| self.surface_failure(index, e))?;

        self.next_index += 1;
        // Rounding can hit 100 with one chunk still unsent; 100 is reserved
        // for the completion marker
        self.percent = percent_complete(self.next_index, self.total).min(99);
        if let Some(observer) = self.observer.as_mut() {
            observer.on_progress(self.percent);
        }

        if self.next_index >= self.total {
            return self.send_complete(channel);
        }
        Ok(SendStep::Sent {
            index,
            percent: self.percent,
        })
    }

    /// The channel closed before completion: stop scheduling and release
    /// per-receiver state. The transfer is abandoned, not resumed.
    pub fn on_channel_closed(&mut self) {
        if self.phase != SessionPhase::Completed {
            tracing::debug!(
                sent = self.next_index,
                total = self.total,
                "channel closed mid-transfer, abandoning"
            );
        }
        self.phase.advance(SessionPhase::Closed);
        self.payload = Arc::new(Vec::new());
    }

    /// Progress for this receiver, `round(next/total*100)`, capped at 99
    /// until the completion marker goes out.
    #[must_use]
    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Index of the next unsent chunk.
    #[must_use]
    pub fn next_chunk_index(&self) -> u64 {
        self.next_index
    }

    /// Total chunk count for this payload.
    #[must_use]
    pub fn total_chunks(&self) -> u64 {
        self.total
    }

    /// Whether the completion marker has been sent.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.phase == SessionPhase::Completed
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn send_complete<C: DirectChannel>(
        &mut self,
        channel: &mut C,
    ) -> Result<SendStep, TransferError> {
        channel
            .send(TransferMessage::Complete)
            .map_err(|e| self.surface_failure(self.next_index, e))?;
        self.phase.advance(SessionPhase::Completed);
        self.percent = 100;
        if let Some(observer) = self.observer.as_mut() {
            observer.on_progress(self.percent);
        }
        Ok(SendStep::Finished)
    }

    fn surface_failure(&mut self, index: u64, error: ChannelError) -> TransferError {
        tracing::warn!(index, %error, "chunk send failed");
        if let Some(observer) = self.observer.as_mut() {
            observer.on_send_failed(index, &error);
        }
        TransferError::Channel(error)
    }
}
