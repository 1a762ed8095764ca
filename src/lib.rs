// src/lib.rs
//
// Crate root: module wiring plus the public re-exports.
//
// rangefs presents a remote object store (opaque object IDs, ranged HTTP
// downloads) as a local read-mostly filesystem. The chunk layer (storage,
// queue, workers, manager) is the core; the backend, metadata, and FUSE
// modules are the collaborators around it.

pub mod backend;
pub mod config;
pub mod constants;
pub mod error;
pub mod manager;
pub mod manifest;
pub mod metadata;
pub mod queue;
pub mod storage;
pub mod types;
pub mod worker;

#[cfg(feature = "mount")]
pub mod fs;
#[cfg(feature = "mount")]
pub mod mount;

pub use backend::{CredentialSource, HttpBackend, HttpBackendConfig, ObjectFetch};
pub use config::ManagerConfig;
pub use error::ChunkError;
pub use manager::ChunkManager;
pub use manifest::ManifestIndex;
pub use metadata::{MetadataCache, MetadataSource};
pub use storage::ChunkStorage;
pub use types::{ChunkKey, ObjectDescriptor};
