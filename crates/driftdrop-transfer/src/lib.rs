//! # Driftdrop Transfer
//!
//! Chunked transfer engine for driftdrop.
//!
//! This crate provides:
//! - Payload slicing with a fixed sender chunk size
//! - Owner-side chunk pacing, one [`ChunkSender`] per receiver
//! - Receiver-side reassembly with out-of-order tolerance
//! - Progress accounting per receiver and averaged across receivers
//!
//! Both sides run over a reliable, ordered direct channel established
//! outside this crate; metadata is always the first application message and
//! the completion marker always the last.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunker;
pub mod error;
pub mod progress;
pub mod reassembly;
pub mod sender;

pub use chunker::PayloadChunker;
pub use error::{ChannelError, TransferError};
pub use progress::ShareProgress;
pub use reassembly::ChunkReassembler;
pub use sender::{ChunkSender, DirectChannel, SendStep, TransferObserver};

/// Chunk size the owner slices payloads with (1 MiB).
pub const SENDER_CHUNK_SIZE: usize = 1024 * 1024;

/// Nominal chunk size receivers use to pre-size slot storage (64 KiB).
///
/// A preallocation hint only; the authoritative slot count comes from the
/// `total` field of the first chunk.
pub const NOMINAL_CHUNK_SIZE: usize = 64 * 1024;
