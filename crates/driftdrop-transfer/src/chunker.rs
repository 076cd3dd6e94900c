//! Payload slicing.

use crate::SENDER_CHUNK_SIZE;

/// Slices a payload into fixed-size chunks.
#[derive(Debug, Clone, Copy)]
pub struct PayloadChunker {
    chunk_size: usize,
}

impl PayloadChunker {
    /// Create a chunker with the default sender chunk size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_chunk_size(SENDER_CHUNK_SIZE)
    }

    /// Create a chunker with a custom chunk size.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    #[must_use]
    pub fn with_chunk_size(size: usize) -> Self {
        assert!(size > 0, "chunk size must be non-zero");
        Self { chunk_size: size }
    }

    /// Get the chunk size.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks needed for a payload of `payload_len` bytes.
    #[must_use]
    pub fn chunk_count(&self, payload_len: u64) -> u64 {
        payload_len.div_ceil(self.chunk_size as u64)
    }

    /// The `index`-th slice of `payload`, or `None` past the end.
    ///
    /// Every slice is `chunk_size` bytes except possibly the last.
    #[must_use]
    pub fn slice<'a>(&self, payload: &'a [u8], index: u64) -> Option<&'a [u8]> {
        let start = (index as usize).checked_mul(self.chunk_size)?;
        if start >= payload.len() {
            return None;
        }
        let end = payload.len().min(start + self.chunk_size);
        Some(&payload[start..end])
    }
}

impl Default for PayloadChunker {
    fn default() -> Self {
        Self::new()
    }
}
