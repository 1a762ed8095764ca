// src/manager.rs
//
// Public read API of the chunk layer.
//
// A read (object, offset, size) is answered from the first chunk covering
// `offset`: the manager aligns the offset down to a chunk boundary, submits
// that key as the primary request, fires speculative submits for the next
// `look_ahead` chunks, and returns the byte range
// `chunk[inner .. min(inner + size, chunk_end)]`. Reads that span several
// chunks therefore return the prefix up to the chunk boundary; callers
// re-invoke for the rest, exactly like a short read(2).

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::backend::ObjectFetch;
use crate::config::ManagerConfig;
use crate::error::ChunkError;
use crate::queue::RequestQueue;
use crate::storage::ChunkStorage;
use crate::types::{ChunkKey, ObjectDescriptor};
use crate::worker::FetcherPool;

/// Owns the chunk cache, the fetch queue, and the worker pool.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct ChunkManager {
    config: ManagerConfig,
    storage: Arc<ChunkStorage>,
    queue: Arc<RequestQueue>,
    workers: Mutex<Option<FetcherPool>>,
}

impl ChunkManager {
    /// Validate `config`, clear the chunk store, and spawn the fetcher pool
    /// onto the current tokio runtime.
    pub fn new(config: ManagerConfig, backend: Arc<dyn ObjectFetch>) -> Result<Self> {
        config
            .validate()
            .context("invalid chunk manager configuration")?;

        let storage = Arc::new(ChunkStorage::new(config.max_chunks));
        storage.purge();
        let queue = Arc::new(RequestQueue::new(Arc::clone(&storage), config.queue_depth));
        let workers = FetcherPool::spawn(&config, Arc::clone(&queue), Arc::clone(&storage), backend);
        debug!(
            "Chunk manager started: chunk_size={} max_chunks={} workers={} look_ahead={}",
            config.chunk_size, config.max_chunks, config.num_workers, config.look_ahead
        );

        Ok(Self {
            config,
            storage,
            queue,
            workers: Mutex::new(Some(workers)),
        })
    }

    /// Read up to `size` bytes of `object` starting at `offset`.
    ///
    /// Returns at most one chunk's worth of data: the result is truncated at
    /// the next chunk boundary. A read past the end of the object yields an
    /// empty buffer. Dropping the returned future abandons the reply; the
    /// fetch itself still runs to completion so its result can serve other
    /// waiters.
    pub async fn get_chunk(
        &self,
        object: &ObjectDescriptor,
        offset: u64,
        size: u64,
    ) -> Result<Bytes, ChunkError> {
        if size == 0 {
            return Ok(Bytes::new());
        }

        let chunk_size = self.config.chunk_size;
        let chunk_offset = offset / chunk_size * chunk_size;
        let inner = (offset - chunk_offset) as usize;
        let key = ChunkKey::new(&object.object_id, chunk_offset);
        trace!(
            "Read {}..+{} of {} via chunk {}",
            offset, size, object.object_id, key
        );

        let (tx, rx) = oneshot::channel();
        self.queue.submit(object, key, Some(tx)).await;
        self.submit_look_aheads(object, chunk_offset).await;

        let buf = match rx.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ChunkError::Internal(
                    "reply channel closed before completion".into(),
                ))
            }
        };
        if inner >= buf.len() {
            return Ok(Bytes::new());
        }
        let end = buf.len().min(inner + size as usize);
        Ok(buf.slice(inner..end))
    }

    /// Fire-and-forget submits for the chunks following `chunk_offset`,
    /// bounded by the object size. These only warm the cache; a full queue
    /// sheds them.
    async fn submit_look_aheads(&self, object: &ObjectDescriptor, chunk_offset: u64) {
        let chunk_size = self.config.chunk_size;
        for i in 1..=self.config.look_ahead {
            let offset = chunk_offset + i * chunk_size;
            if offset >= object.size {
                break;
            }
            let key = ChunkKey::new(&object.object_id, offset);
            self.queue.submit(object, key, None).await;
        }
    }

    /// Number of chunks currently cached.
    pub fn cached_chunks(&self) -> usize {
        self.storage.len()
    }

    /// Number of chunk fetches currently pending.
    pub fn pending_fetches(&self) -> usize {
        self.queue.pending_len()
    }

    /// The configuration this manager runs with.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Graceful shutdown: refuse new submissions, stop the workers
    /// (in-flight fetches drain first), fail whatever was still queued, then
    /// drop the cache. Idempotent.
    pub async fn close(&self) {
        let workers = self.workers.lock().take();
        if let Some(pool) = workers {
            self.queue.close();
            pool.shutdown().await;
            self.queue
                .fail_all_pending(ChunkError::Internal("chunk manager closed".into()));
            self.storage.purge();
            debug!("Chunk manager closed");
        }
    }
}
