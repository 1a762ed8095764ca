// src/error.rs
//
// Typed error surface of the chunk core.

use thiserror::Error;

/// Error kinds a chunk fetch can surface to its waiters.
///
/// `Clone` matters here: one failed fetch fans out to every caller that
/// coalesced onto the same pending chunk. Caller cancellation is not an
/// error value at all; a vanished caller is a dropped reply channel and is
/// discarded at delivery time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// The backend reported 404 for the object. Never retried.
    #[error("object not found: {0}")]
    NotFound(String),

    /// 5xx, connection reset, or per-attempt timeout. Retried up to the
    /// configured budget before being surfaced.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// 401/403 that survived a credential refresh.
    #[error("authorization rejected by backend: {0}")]
    Auth(String),

    /// Invariant violation inside the core. Logged and surfaced, never a
    /// process abort.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChunkError {
    /// Whether the fetch worker should retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChunkError::Transient(_))
    }
}
