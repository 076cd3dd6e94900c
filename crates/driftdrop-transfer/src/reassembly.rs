//! Receiver-side chunk reassembly.
//!
//! A [`ChunkReassembler`] accumulates chunks into the final payload. The
//! direct channel is reliable and ordered, so out-of-order and duplicate
//! tolerance here is defensive, not load-bearing. State lives for one
//! transfer: channel close releases everything synchronously.

use crate::error::TransferError;
use crate::progress::percent_complete;
use crate::NOMINAL_CHUNK_SIZE;
use driftdrop_core::session::{FileMetadata, SessionPhase};

/// Accumulates chunks into the final payload and signals completion.
pub struct ChunkReassembler {
    metadata: Option<FileMetadata>,
    slots: Vec<Option<Vec<u8>>>,
    /// Set once the first chunk's `total` has resized the slots.
    total_known: bool,
    bytes_received: u64,
    percent: u8,
    phase: SessionPhase,
    /// Retained after completion so the payload can be re-delivered
    /// without a new transfer.
    assembled: Option<Vec<u8>>,
}

impl ChunkReassembler {
    /// Create an empty reassembler for one incoming transfer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: None,
            slots: Vec::new(),
            total_known: false,
            bytes_received: 0,
            percent: 0,
            phase: SessionPhase::DownloadRequested,
            assembled: None,
        }
    }

    /// First application message: size the slot sequence from the metadata
    /// estimate.
    ///
    /// The estimate (`ceil(size / NOMINAL_CHUNK_SIZE)`) is a hint only; the
    /// first chunk's `total` field is authoritative. Duplicate metadata is
    /// tolerated and ignored.
    pub fn on_metadata(&mut self, metadata: FileMetadata) -> Result<(), TransferError> {
        if self.phase.is_closed() {
            return Err(TransferError::Closed);
        }
        if self.metadata.is_some() {
            return Ok(());
        }
        let estimate = metadata.size.div_ceil(NOMINAL_CHUNK_SIZE as u64) as usize;
        self.slots = vec![None; estimate];
        tracing::debug!(name = %metadata.name, size = metadata.size, estimate, "incoming transfer");
        self.metadata = Some(metadata);
        self.phase.advance(SessionPhase::Transferring);
        Ok(())
    }

    /// Store one chunk at its slot.
    ///
    /// Out-of-order arrival, duplicates, and gaps before completion are all
    /// tolerated; overwriting a duplicate keeps the byte accounting exact.
    pub fn on_chunk(&mut self, index: u64, total: u64, bytes: Vec<u8>) -> Result<(), TransferError> {
        if self.phase.is_closed() {
            return Err(TransferError::Closed);
        }
        let Some(metadata) = &self.metadata else {
            return Err(TransferError::Protocol("chunk before metadata"));
        };
        if !self.total_known {
            // The wire total overrides the preallocation estimate
            self.slots.resize(total as usize, None);
            self.total_known = true;
        }
        if index >= self.slots.len() as u64 {
            return Err(TransferError::Protocol("chunk index out of range"));
        }

        let slot = &mut self.slots[index as usize];
        if let Some(previous) = slot.take() {
            self.bytes_received -= previous.len() as u64;
        }
        self.bytes_received += bytes.len() as u64;
        *slot = Some(bytes);
        // 100 is reserved for the completion marker
        self.percent = percent_complete(self.bytes_received, metadata.size).min(99);
        Ok(())
    }

    /// Completion marker: concatenate filled slots in index order and hand
    /// the payload back for delivery.
    ///
    /// Unfilled slots fail the transfer explicitly with
    /// [`TransferError::PartialTransfer`] rather than producing a silently
    /// truncated payload. On success, accumulation state is reset and the
    /// assembled payload retained so it can be re-delivered.
    pub fn on_complete(&mut self) -> Result<Vec<u8>, TransferError> {
        if self.phase.is_closed() {
            return Err(TransferError::Closed);
        }
        // Duplicate completion: re-deliver the retained payload
        if self.phase == SessionPhase::Completed {
            return Ok(self.assembled.clone().unwrap_or_default());
        }
        if self.metadata.is_none() {
            return Err(TransferError::Protocol("completion before metadata"));
        }

        let total = self.slots.len();
        let missing = self.slots.iter().filter(|slot| slot.is_none()).count();
        if missing > 0 {
            tracing::warn!(missing, total, "completion with unfilled slots");
            self.phase.advance(SessionPhase::Closed);
            self.release();
            return Err(TransferError::PartialTransfer { missing, total });
        }

        let mut payload = Vec::with_capacity(self.bytes_received as usize);
        for slot in self.slots.drain(..) {
            if let Some(bytes) = slot {
                payload.extend_from_slice(&bytes);
            }
        }
        self.total_known = false;
        self.percent = 100;
        self.phase.advance(SessionPhase::Completed);
        self.assembled = Some(payload.clone());
        Ok(payload)
    }

    /// Payload from the last completed transfer, for re-delivery.
    #[must_use]
    pub fn last_payload(&self) -> Option<&[u8]> {
        self.assembled.as_deref()
    }

    /// The channel closed: synchronously release all reassembly state.
    pub fn on_channel_closed(&mut self) {
        self.phase.advance(SessionPhase::Closed);
        self.release();
    }

    /// Progress, `round(bytes_received/size*100)`, capped at 99 until the
    /// completion marker is processed.
    #[must_use]
    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Bytes accumulated so far.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Indices of slots still unfilled.
    #[must_use]
    pub fn missing_indices(&self) -> Vec<u64> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| i as u64)
            .collect()
    }

    /// Whether the payload has been fully assembled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.phase == SessionPhase::Completed
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn release(&mut self) {
        self.slots = Vec::new();
        self.metadata = None;
        self.total_known = false;
        self.bytes_received = 0;
    }
}

impl Default for ChunkReassembler {
    fn default() -> Self {
        Self::new()
    }
}
