//! Error types for the rendezvous core.

use thiserror::Error;

/// Errors returned at the registry boundary.
///
/// These are structured results, not fatal faults: neither variant ends a
/// session or tears down other participants.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// Unknown share id.
    #[error("share not found")]
    NotFound,

    /// Metadata publish attempted by a connection that is not the owner.
    #[error("only the share owner may publish metadata")]
    Unauthorized,
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
