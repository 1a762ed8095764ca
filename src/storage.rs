// src/storage.rs
//
// Bounded in-memory LRU store for fetched chunks.

use std::num::NonZeroUsize;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::types::ChunkKey;

/// Fixed-capacity LRU map from chunk key to immutable chunk bytes.
///
/// Buffers are `Bytes`, so a load hands out a cheap refcounted view; nothing
/// is ever mutated after insertion. All operations serialize on one internal
/// lock, which is held only for the map operation itself.
pub struct ChunkStorage {
    chunks: Mutex<LruCache<ChunkKey, Bytes>>,
}

impl ChunkStorage {
    /// Create a store that holds at most `max_chunks` chunks.
    pub fn new(max_chunks: usize) -> Self {
        let capacity = NonZeroUsize::new(max_chunks.max(1)).unwrap();
        Self {
            chunks: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up a chunk, marking it most-recently-used on a hit.
    pub fn load(&self, key: &ChunkKey) -> Option<Bytes> {
        let mut chunks = self.chunks.lock();
        match chunks.get(key) {
            Some(buf) => {
                trace!("Cache hit for chunk {}", key);
                Some(buf.clone())
            }
            None => {
                trace!("Cache miss for chunk {}", key);
                None
            }
        }
    }

    /// Insert a chunk, evicting the least-recently-used entry if the store
    /// is at capacity.
    pub fn store(&self, key: ChunkKey, buf: Bytes) {
        let mut chunks = self.chunks.lock();
        if let Some((evicted, _)) = chunks.push(key.clone(), buf) {
            if evicted != key {
                debug!("Evicted chunk {}", evicted);
            }
        }
    }

    /// Drop every cached chunk. Called once at manager startup.
    pub fn purge(&self) {
        let mut chunks = self.chunks.lock();
        let dropped = chunks.len();
        chunks.clear();
        if dropped > 0 {
            debug!("Purged {} cached chunks", dropped);
        }
    }

    /// Number of chunks currently resident.
    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
