// src/config.rs
//
// Tuning knobs for the chunk manager.
//
// Builder helpers are provided so callers can write a fluent style:
//
//   let cfg = ManagerConfig::default()
//       .with_chunk_size(4096)
//       .with_max_chunks(5)
//       .with_num_workers(1)
//       .with_look_ahead(2);

use std::time::Duration;

use anyhow::{bail, Result};

use crate::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_FETCH_TIMEOUT, DEFAULT_LOOK_AHEAD, DEFAULT_MAX_CHUNKS,
    DEFAULT_NUM_WORKERS, DEFAULT_QUEUE_DEPTH, DEFAULT_RETRY_BUDGET,
};

/// Configuration for a [`ChunkManager`](crate::manager::ChunkManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Byte length of each chunk. Must be > 0; a power of two keeps chunk
    /// boundaries aligned with typical kernel read sizes but is not required.
    pub chunk_size: u64,

    /// Capacity of the LRU chunk cache, in chunks.
    pub max_chunks: usize,

    /// Number of concurrent fetch workers (>= 1).
    pub num_workers: usize,

    /// Number of chunks speculatively fetched after each read.
    pub look_ahead: u64,

    /// Capacity of the fetch queue.
    pub queue_depth: usize,

    /// Wall-clock timeout for a single fetch attempt.
    pub fetch_timeout: Duration,

    /// Max retries on transient fetch failure.
    pub retry_budget: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunks: DEFAULT_MAX_CHUNKS,
            num_workers: DEFAULT_NUM_WORKERS,
            look_ahead: DEFAULT_LOOK_AHEAD,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }
}

impl ManagerConfig {
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = max_chunks;
        self
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_look_ahead(mut self, look_ahead: u64) -> Self {
        self.look_ahead = look_ahead;
        self
    }

    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    /// Reject configurations the manager cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be greater than zero");
        }
        if self.num_workers == 0 {
            bail!("num_workers must be at least 1");
        }
        if self.max_chunks < self.num_workers {
            bail!(
                "max_chunks ({}) must be at least num_workers ({})",
                self.max_chunks,
                self.num_workers
            );
        }
        if self.queue_depth == 0 {
            bail!("queue_depth must be at least 1");
        }
        Ok(())
    }
}
