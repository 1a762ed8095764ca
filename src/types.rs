// src/types.rs
//
// Core data model: chunk keys and the read-only object descriptors handed
// over by the metadata layer.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Identity of one cached byte range: object ID plus the chunk-aligned
/// starting offset.
///
/// `chunk_offset` is always a multiple of the manager's chunk size. Rendered
/// as `"<object_id>:<chunk_offset>"` in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub object_id: String,
    pub chunk_offset: u64,
}

impl ChunkKey {
    pub fn new(object_id: impl Into<String>, chunk_offset: u64) -> Self {
        Self {
            object_id: object_id.into(),
            chunk_offset,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_id, self.chunk_offset)
    }
}

/// One remote object as described by the metadata collaborator.
///
/// The chunk core treats descriptors as opaque handles: it reads
/// `object_id`, `size`, and `download_url` and never mutates anything.
/// The remaining fields exist for the filesystem bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub object_id: String,
    pub name: String,
    /// Object ID of the containing directory; `None` marks the root.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub is_dir: bool,
    /// Ranged GETs go against this URL. Empty for directories.
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub modified: Option<SystemTime>,
}

impl ObjectDescriptor {
    /// Number of chunks of `chunk_size` needed to cover this object.
    pub fn chunk_count(&self, chunk_size: u64) -> u64 {
        self.size.div_ceil(chunk_size)
    }
}
