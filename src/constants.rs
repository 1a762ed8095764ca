// src/constants.rs
//
// Centralized defaults for rangefs to avoid hardcoded values throughout the codebase

use std::time::Duration;

/// Default chunk size in bytes (10 MiB).
///
/// Every cached byte range is aligned to a multiple of this value; only the
/// final chunk of an object may be shorter.
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Default capacity of the in-memory chunk cache, in chunks.
pub const DEFAULT_MAX_CHUNKS: usize = 64;

/// Default number of concurrent fetch workers.
pub const DEFAULT_NUM_WORKERS: usize = 4;

/// Default number of chunks speculatively fetched ahead of a read.
pub const DEFAULT_LOOK_AHEAD: u64 = 3;

/// Default capacity of the fetch queue.
///
/// A full queue blocks primary submissions (backpressure) and sheds
/// speculative ones.
pub const DEFAULT_QUEUE_DEPTH: usize = 128;

/// Default wall-clock timeout for a single fetch attempt.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries for transient fetch failures.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// First retry delay for transient fetch failures.
pub const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Multiplier applied to the retry delay after each failed attempt.
pub const RETRY_BACKOFF_FACTOR: u32 = 2;

/// Upper bound on the retry delay.
pub const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(8);

/// Default TTL for cached directory metadata.
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(60);

/// Default cap on concurrent HTTP range requests issued by the backend.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 64;

/// Default connect timeout for the HTTP backend.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
