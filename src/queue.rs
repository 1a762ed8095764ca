// src/queue.rs
//
// Bounded fetch queue with single-flight deduplication.
//
// Every chunk key is in exactly one of three states: absent, pending
// (indexed here, fetch in flight or queued), or cached in storage. The
// pending index is what collapses concurrent requests for one key into a
// single backend fetch; waiters that arrive while a key is pending coalesce
// onto it and are all notified on completion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::ChunkError;
use crate::storage::ChunkStorage;
use crate::types::{ChunkKey, ObjectDescriptor};

/// Reply channel for one primary request. The manager slices the delivered
/// chunk down to the caller's byte range; a dropped receiver is the caller's
/// cancellation and is ignored at delivery time.
pub type ReplySink = oneshot::Sender<Result<Bytes, ChunkError>>;

/// One unit of work for the fetcher pool.
#[derive(Debug)]
pub struct FetchJob {
    pub key: ChunkKey,
    pub object: ObjectDescriptor,
}

/// A chunk fetch that has been enqueued but not yet completed.
struct Pending {
    waiters: Vec<ReplySink>,
    created_at: Instant,
}

/// Bounded FIFO of fetch jobs plus the pending index.
///
/// A full FIFO blocks primary submissions, which is the natural backpressure
/// against read-ahead floods; speculative submissions are shed instead.
pub struct RequestQueue {
    storage: Arc<ChunkStorage>,
    pending: Mutex<HashMap<ChunkKey, Pending>>,
    jobs_tx: mpsc::Sender<FetchJob>,
    jobs_rx: AsyncMutex<mpsc::Receiver<FetchJob>>,
    closed: AtomicBool,
}

impl RequestQueue {
    pub fn new(storage: Arc<ChunkStorage>, queue_depth: usize) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::channel(queue_depth.max(1));
        Self {
            storage,
            pending: Mutex::new(HashMap::new()),
            jobs_tx,
            jobs_rx: AsyncMutex::new(jobs_rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Submit a fetch for `key`.
    ///
    /// Cached keys are answered immediately. Keys already pending gain
    /// `waiter` (if any) and cause no new work. Otherwise a Pending is
    /// created and a job is enqueued: with a waiter this blocks while the
    /// FIFO is full, without one the job is dropped instead, so read-ahead
    /// can never stall a caller.
    pub async fn submit(
        self: &Arc<Self>,
        object: &ObjectDescriptor,
        key: ChunkKey,
        waiter: Option<ReplySink>,
    ) {
        if self.closed.load(Ordering::Acquire) {
            if let Some(tx) = waiter {
                let _ = tx.send(Err(ChunkError::Internal("fetch queue is shut down".into())));
            }
            return;
        }
        if let Some(buf) = self.storage.load(&key) {
            if let Some(tx) = waiter {
                let _ = tx.send(Ok(buf));
            }
            return;
        }

        let primary = waiter.is_some();
        {
            let mut pending = self.pending.lock();
            if let Some(entry) = pending.get_mut(&key) {
                trace!("Coalescing onto pending chunk {}", key);
                if let Some(tx) = waiter {
                    entry.waiters.push(tx);
                }
                return;
            }
            // A fetch may have completed between the cache probe above and
            // taking this lock; re-check before creating fresh work.
            if let Some(buf) = self.storage.load(&key) {
                if let Some(tx) = waiter {
                    let _ = tx.send(Ok(buf));
                }
                return;
            }
            pending.insert(
                key.clone(),
                Pending {
                    waiters: waiter.into_iter().collect(),
                    created_at: Instant::now(),
                },
            );
        }

        // Re-check after publishing the Pending: a close() that ran in
        // between has already drained the index, so this entry would never
        // be failed or claimed.
        if self.closed.load(Ordering::Acquire) {
            self.fail_pending(
                &key,
                ChunkError::Internal("fetch queue is shut down".into()),
            );
            return;
        }

        let job = FetchJob {
            key: key.clone(),
            object: object.clone(),
        };
        if primary {
            if self.jobs_tx.send(job).await.is_err() {
                self.fail_pending(
                    &key,
                    ChunkError::Internal("fetch queue is shut down".into()),
                );
            }
            return;
        }

        match self.jobs_tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => self.retract_or_force(job),
            Err(TrySendError::Closed(_)) => {
                self.fail_pending(
                    &key,
                    ChunkError::Internal("fetch queue is shut down".into()),
                );
            }
        }
    }

    /// A speculative job found the FIFO full. Retract its Pending unless a
    /// primary waiter joined in the meantime; in that rare race the job is
    /// re-pushed with a blocking send on a spawned task so the waiter still
    /// gets its reply.
    fn retract_or_force(self: &Arc<Self>, job: FetchJob) {
        let has_waiters = {
            let mut pending = self.pending.lock();
            match pending.get(&job.key) {
                Some(entry) if entry.waiters.is_empty() => {
                    pending.remove(&job.key);
                    false
                }
                Some(_) => true,
                None => return,
            }
        };
        if !has_waiters {
            trace!("Dropping look-ahead for chunk {}: queue full", job.key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let key = job.key.clone();
            if queue.jobs_tx.send(job).await.is_err() {
                queue.fail_pending(
                    &key,
                    ChunkError::Internal("fetch queue is shut down".into()),
                );
            }
        });
    }

    /// Blocking dequeue used by the fetcher pool. Returns `None` once
    /// shutdown is signalled or the queue is closed.
    pub async fn claim(&self, cancel: &CancellationToken) -> Option<FetchJob> {
        let mut jobs_rx = self.jobs_rx.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => None,
            job = jobs_rx.recv() => job,
        }
    }

    /// Resolve a pending chunk and notify every waiter exactly once.
    ///
    /// On success the chunk is already in storage (the worker inserts it
    /// just before calling this); on error nothing is cached, so the key
    /// falls back to absent and the next submit refetches from scratch.
    pub fn complete(&self, key: &ChunkKey, result: Result<Bytes, ChunkError>) {
        let entry = self.pending.lock().remove(key);
        let Some(entry) = entry else {
            warn!("Completion for chunk {} with no pending entry", key);
            return;
        };
        debug!(
            "Chunk {} completed ({:?} after enqueue, {} waiters, ok={})",
            key,
            entry.created_at.elapsed(),
            entry.waiters.len(),
            result.is_ok(),
        );
        for tx in entry.waiters {
            if tx.send(result.clone()).is_err() {
                trace!("Waiter for chunk {} is gone, dropping reply", key);
            }
        }
    }

    /// Number of keys currently pending. Exposed for stats and tests.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Refuse further submissions. Keys already pending stay indexed until
    /// they complete or [`fail_all_pending`](Self::fail_all_pending) runs.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Fail every pending key in one sweep. Called after the worker pool
    /// has exited so no queued request is left waiting forever.
    pub fn fail_all_pending(&self, err: ChunkError) {
        let drained: Vec<Pending> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            for tx in entry.waiters {
                let _ = tx.send(Err(err.clone()));
            }
        }
    }

    fn fail_pending(&self, key: &ChunkKey, err: ChunkError) {
        self.complete(key, Err(err));
    }
}
