// src/worker.rs
//
// Fetcher pool: claims queued chunk jobs, drives the backend with retry and
// per-attempt timeouts, and publishes results to storage + waiters.

use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::backend::ObjectFetch;
use crate::config::ManagerConfig;
use crate::constants::{RETRY_BACKOFF_BASE, RETRY_BACKOFF_CAP, RETRY_BACKOFF_FACTOR};
use crate::error::ChunkError;
use crate::queue::{FetchJob, RequestQueue};
use crate::storage::ChunkStorage;

/// Fixed set of fetch workers. Workers never talk to each other; all
/// coordination flows through the queue.
pub struct FetcherPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl FetcherPool {
    /// Spawn `num_workers` fetchers onto the current runtime.
    pub fn spawn(
        config: &ManagerConfig,
        queue: Arc<RequestQueue>,
        storage: Arc<ChunkStorage>,
        backend: Arc<dyn ObjectFetch>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let handles = (0..config.num_workers)
            .map(|id| {
                let config = config.clone();
                let queue = Arc::clone(&queue);
                let storage = Arc::clone(&storage);
                let backend = Arc::clone(&backend);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    run_worker(id, config, queue, storage, backend, cancel).await;
                })
            })
            .collect();
        Self { handles, cancel }
    }

    /// Signal shutdown and wait for every worker to exit. In-flight fetches
    /// run to completion first; their results may still serve other waiters.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        futures::future::join_all(self.handles).await;
    }
}

async fn run_worker(
    id: usize,
    config: ManagerConfig,
    queue: Arc<RequestQueue>,
    storage: Arc<ChunkStorage>,
    backend: Arc<dyn ObjectFetch>,
    cancel: CancellationToken,
) {
    debug!("Fetch worker {} started", id);
    while let Some(job) = queue.claim(&cancel).await {
        match fetch_with_retry(&*backend, &job, &config).await {
            Ok(buf) => {
                storage.store(job.key.clone(), buf.clone());
                queue.complete(&job.key, Ok(buf));
            }
            Err(err) => {
                error!("Chunk {} failed: {}", job.key, err);
                queue.complete(&job.key, Err(err));
            }
        }
    }
    debug!("Fetch worker {} stopped", id);
}

/// One ranged fetch with the retry policy of the manager: transient failures
/// back off exponentially up to the retry budget, everything else surfaces
/// immediately. Each attempt is bounded by `fetch_timeout`.
async fn fetch_with_retry(
    backend: &dyn ObjectFetch,
    job: &FetchJob,
    config: &ManagerConfig,
) -> Result<Bytes, ChunkError> {
    let mut retries = 0;
    let mut delay = RETRY_BACKOFF_BASE;
    loop {
        let attempt = tokio::time::timeout(
            config.fetch_timeout,
            backend.fetch(&job.object, job.key.chunk_offset, config.chunk_size),
        )
        .await;
        let err = match attempt {
            Ok(Ok(buf)) => {
                if buf.len() as u64 > config.chunk_size {
                    // The backend must never hand back more than one chunk.
                    return Err(ChunkError::Internal(format!(
                        "backend returned {} bytes for chunk {} (chunk_size {})",
                        buf.len(),
                        job.key,
                        config.chunk_size
                    )));
                }
                return Ok(buf);
            }
            Ok(Err(err)) => err,
            Err(_) => ChunkError::Transient(format!(
                "fetch attempt timed out after {:?}",
                config.fetch_timeout
            )),
        };

        if !err.is_transient() || retries >= config.retry_budget {
            return Err(err);
        }
        retries += 1;
        warn!(
            "Chunk {} attempt failed ({}), retry {}/{} in {:?}",
            job.key, err, retries, config.retry_budget, delay
        );
        tokio::time::sleep(delay).await;
        delay = (delay * RETRY_BACKOFF_FACTOR).min(RETRY_BACKOFF_CAP);
    }
}
