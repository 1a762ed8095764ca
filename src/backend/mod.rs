// src/backend/mod.rs
//
// Capability seams between the chunk core and the outside world.
//
// The core knows exactly one thing about the network: an `ObjectFetch` can
// turn (object, range) into bytes. The production implementation speaks
// ranged HTTP; tests plug in programmable stubs.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ChunkError;
use crate::types::ObjectDescriptor;

pub mod http;

pub use http::{HttpBackend, HttpBackendConfig};

/// Fetch capability consumed by the worker pool.
#[async_trait]
pub trait ObjectFetch: Send + Sync {
    /// Fetch `range_len` bytes of `object` starting at `range_start`.
    ///
    /// May return fewer bytes than requested when the range straddles the
    /// end of the object; that is not an error. Implementations must be safe
    /// for concurrent use.
    async fn fetch(
        &self,
        object: &ObjectDescriptor,
        range_start: u64,
        range_len: u64,
    ) -> Result<Bytes, ChunkError>;
}

/// Supplies bearer tokens to the HTTP backend and refreshes them when the
/// remote store rejects a request with 401/403.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// The current token, or `None` when the store needs no authorization.
    async fn token(&self) -> anyhow::Result<Option<String>>;

    /// Re-acquire credentials. Called at most once per rejected fetch;
    /// callers serialize refreshes.
    async fn refresh(&self) -> anyhow::Result<()>;
}
