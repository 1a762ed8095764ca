// tests/test_chunk_manager.rs
//
// End-to-end tests of the chunk layer against a programmable stub backend:
// read-ahead, truncation at chunk boundaries, request coalescing, LRU
// eviction, retry, and shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use rangefs::{ChunkError, ChunkManager, ManagerConfig, ObjectDescriptor, ObjectFetch};

const CHUNK_SIZE: u64 = 4096;
const LOOK_AHEAD: u64 = 2;
const MAX_CHUNKS: usize = 5;

/// Stub object store. Returns `range_len` bytes (truncated at EOF) all equal
/// to `range_start % 256`, mirroring what a ranged GET against a real store
/// would produce, and counts every fetch globally and per chunk offset.
struct StubBackend {
    object_size: u64,
    delay: Option<Duration>,
    transient_failures: AtomicUsize,
    total_calls: AtomicUsize,
    calls_by_offset: Mutex<HashMap<u64, usize>>,
}

impl StubBackend {
    fn base(object_size: u64) -> Self {
        Self {
            object_size,
            delay: None,
            transient_failures: AtomicUsize::new(0),
            total_calls: AtomicUsize::new(0),
            calls_by_offset: Mutex::new(HashMap::new()),
        }
    }

    fn new(object_size: u64) -> Arc<Self> {
        Arc::new(Self::base(object_size))
    }

    fn with_delay(object_size: u64, delay: Duration) -> Arc<Self> {
        let mut backend = Self::base(object_size);
        backend.delay = Some(delay);
        Arc::new(backend)
    }

    fn failing_first(object_size: u64, failures: usize) -> Arc<Self> {
        let backend = Self::base(object_size);
        backend.transient_failures.store(failures, Ordering::SeqCst);
        Arc::new(backend)
    }

    fn total(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    fn calls_for(&self, offset: u64) -> usize {
        *self.calls_by_offset.lock().unwrap().get(&offset).unwrap_or(&0)
    }
}

#[async_trait]
impl ObjectFetch for StubBackend {
    async fn fetch(
        &self,
        _object: &ObjectDescriptor,
        range_start: u64,
        range_len: u64,
    ) -> Result<Bytes, ChunkError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_by_offset
            .lock()
            .unwrap()
            .entry(range_start)
            .or_insert(0) += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ChunkError::Transient("injected failure".into()));
        }

        if range_start >= self.object_size {
            return Ok(Bytes::new());
        }
        let len = range_len.min(self.object_size - range_start) as usize;
        Ok(Bytes::from(vec![(range_start % 256) as u8; len]))
    }
}

fn test_object(size: u64) -> ObjectDescriptor {
    ObjectDescriptor {
        object_id: "test/file.txt".into(),
        name: "file.txt".into(),
        parent: Some("test".into()),
        size,
        is_dir: false,
        download_url: "http://localhost/test/file.txt".into(),
        modified: None,
    }
}

fn test_config() -> ManagerConfig {
    ManagerConfig::default()
        .with_chunk_size(CHUNK_SIZE)
        .with_max_chunks(MAX_CHUNKS)
        .with_num_workers(1)
        .with_look_ahead(LOOK_AHEAD)
        .with_queue_depth(32)
        .with_retry_budget(0)
}

/// Poll until `cond` holds or two seconds pass.
async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within deadline");
}

/// Quiesce: no fetches pending, so look-aheads have settled.
async fn settle(manager: &ChunkManager) {
    wait_until(|| manager.pending_fetches() == 0).await;
}

#[tokio::test]
async fn basic_read_downloads_chunk_and_look_aheads() {
    let backend = StubBackend::new(CHUNK_SIZE * 10);
    let manager = ChunkManager::new(test_config(), backend.clone()).unwrap();
    let object = test_object(CHUNK_SIZE * 10);

    let buf = manager.get_chunk(&object, 0, CHUNK_SIZE).await.unwrap();
    assert_eq!(buf.len(), CHUNK_SIZE as usize);
    assert!(buf.iter().all(|&b| b == 0));

    // One primary fetch plus two look-aheads.
    wait_until(|| backend.total() == 3).await;
    assert_eq!(backend.calls_for(0), 1);
    assert_eq!(backend.calls_for(CHUNK_SIZE), 1);
    assert_eq!(backend.calls_for(CHUNK_SIZE * 2), 1);

    manager.close().await;
}

#[tokio::test]
async fn over_request_returns_at_most_one_chunk() {
    let backend = StubBackend::new(CHUNK_SIZE * 10);
    let manager = ChunkManager::new(test_config(), backend).unwrap();
    let object = test_object(CHUNK_SIZE * 10);

    // Twice the chunk size requested; the reply stops at the chunk boundary.
    let buf = manager.get_chunk(&object, 0, CHUNK_SIZE * 2).await.unwrap();
    assert_eq!(buf.len(), CHUNK_SIZE as usize);

    manager.close().await;
}

#[tokio::test]
async fn boundary_crossing_read_is_truncated() {
    let backend = StubBackend::new(CHUNK_SIZE * 10);
    let manager = ChunkManager::new(test_config(), backend).unwrap();
    let object = test_object(CHUNK_SIZE * 10);

    let buf = manager
        .get_chunk(&object, CHUNK_SIZE * 2 + 100, CHUNK_SIZE)
        .await
        .unwrap();
    assert_eq!(buf.len(), CHUNK_SIZE as usize - 100);
    assert!(buf.iter().all(|&b| b == 0));

    manager.close().await;
}

#[tokio::test]
async fn look_ahead_warms_the_cache() {
    let backend = StubBackend::new(CHUNK_SIZE * 10);
    let manager = ChunkManager::new(test_config(), backend.clone()).unwrap();
    let object = test_object(CHUNK_SIZE * 10);

    manager.get_chunk(&object, 0, CHUNK_SIZE).await.unwrap();
    wait_until(|| backend.total() == 3).await;

    // Chunks 1 and 2 were warmed; reading them must not refetch them.
    let buf = manager.get_chunk(&object, CHUNK_SIZE, CHUNK_SIZE).await.unwrap();
    assert_eq!(buf.len(), CHUNK_SIZE as usize);
    let buf = manager
        .get_chunk(&object, CHUNK_SIZE * 2, CHUNK_SIZE)
        .await
        .unwrap();
    assert_eq!(buf.len(), CHUNK_SIZE as usize);

    settle(&manager).await;
    assert_eq!(backend.calls_for(CHUNK_SIZE), 1);
    assert_eq!(backend.calls_for(CHUNK_SIZE * 2), 1);

    manager.close().await;
}

#[tokio::test]
async fn concurrent_reads_for_one_chunk_coalesce() {
    let backend = StubBackend::with_delay(CHUNK_SIZE * 10, Duration::from_millis(50));
    let manager = Arc::new(ChunkManager::new(test_config(), backend.clone()).unwrap());
    let object = test_object(CHUNK_SIZE * 10);

    let readers: Vec<_> = (0..10)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let object = object.clone();
            tokio::spawn(async move { manager.get_chunk(&object, 0, CHUNK_SIZE).await })
        })
        .collect();

    let mut buffers = Vec::new();
    for reader in readers {
        buffers.push(reader.await.unwrap().unwrap());
    }
    assert!(buffers.iter().all(|b| b.len() == CHUNK_SIZE as usize));
    assert!(buffers.windows(2).all(|pair| pair[0] == pair[1]));

    // Ten callers, one fetch for the shared chunk (plus its look-aheads).
    settle(&manager).await;
    assert_eq!(backend.calls_for(0), 1);
    assert_eq!(backend.total(), 3);

    manager.close().await;
}

#[tokio::test]
async fn eviction_bounds_residency_and_forces_refetch() {
    let backend = StubBackend::new(CHUNK_SIZE * 10);
    let manager = ChunkManager::new(test_config(), backend.clone()).unwrap();
    let object = test_object(CHUNK_SIZE * 10);

    for chunk in 0..=6u64 {
        manager
            .get_chunk(&object, chunk * CHUNK_SIZE, CHUNK_SIZE)
            .await
            .unwrap();
        settle(&manager).await;
        assert!(
            manager.cached_chunks() <= MAX_CHUNKS,
            "cache exceeded capacity after chunk {chunk}"
        );
    }

    // Chunk 0 has long been evicted; reading it again refetches.
    assert_eq!(backend.calls_for(0), 1);
    manager.get_chunk(&object, 0, CHUNK_SIZE).await.unwrap();
    assert_eq!(backend.calls_for(0), 2);

    manager.close().await;
}

#[tokio::test]
async fn reads_are_idempotent() {
    let backend = StubBackend::new(CHUNK_SIZE * 10);
    let manager = ChunkManager::new(test_config(), backend).unwrap();
    let object = test_object(CHUNK_SIZE * 10);

    let first = manager.get_chunk(&object, 300, 1000).await.unwrap();
    let second = manager.get_chunk(&object, 300, 1000).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 1000);

    manager.close().await;
}

#[tokio::test]
async fn short_final_chunk_is_not_an_error() {
    let size = CHUNK_SIZE * 2 + CHUNK_SIZE / 2;
    let backend = StubBackend::new(size);
    let manager = ChunkManager::new(test_config(), backend).unwrap();
    let object = test_object(size);

    let buf = manager
        .get_chunk(&object, CHUNK_SIZE * 2, CHUNK_SIZE)
        .await
        .unwrap();
    assert_eq!(buf.len(), (CHUNK_SIZE / 2) as usize);

    manager.close().await;
}

#[tokio::test]
async fn read_past_eof_returns_empty() {
    let backend = StubBackend::new(CHUNK_SIZE);
    let manager = ChunkManager::new(test_config(), backend).unwrap();
    let object = test_object(CHUNK_SIZE);

    let buf = manager
        .get_chunk(&object, CHUNK_SIZE * 4, CHUNK_SIZE)
        .await
        .unwrap();
    assert!(buf.is_empty());

    let buf = manager.get_chunk(&object, 0, 0).await.unwrap();
    assert!(buf.is_empty());

    manager.close().await;
}

#[tokio::test]
async fn not_found_surfaces_to_the_caller() {
    struct Missing;
    #[async_trait]
    impl ObjectFetch for Missing {
        async fn fetch(
            &self,
            object: &ObjectDescriptor,
            _range_start: u64,
            _range_len: u64,
        ) -> Result<Bytes, ChunkError> {
            Err(ChunkError::NotFound(object.object_id.clone()))
        }
    }

    let manager = ChunkManager::new(test_config(), Arc::new(Missing)).unwrap();
    let object = test_object(CHUNK_SIZE * 10);

    let err = manager.get_chunk(&object, 0, CHUNK_SIZE).await.unwrap_err();
    assert_eq!(err, ChunkError::NotFound("test/file.txt".into()));

    manager.close().await;
}

#[tokio::test]
async fn failed_fetch_is_not_cached() {
    let backend = StubBackend::failing_first(CHUNK_SIZE * 10, 1);
    let config = test_config().with_look_ahead(0);
    let manager = ChunkManager::new(config, backend.clone()).unwrap();
    let object = test_object(CHUNK_SIZE * 10);

    // Retry budget is zero, so the injected failure surfaces.
    let err = manager.get_chunk(&object, 0, CHUNK_SIZE).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(manager.cached_chunks(), 0);

    // The key fell back to absent; the next read fetches from scratch.
    let buf = manager.get_chunk(&object, 0, CHUNK_SIZE).await.unwrap();
    assert_eq!(buf.len(), CHUNK_SIZE as usize);
    assert_eq!(backend.calls_for(0), 2);

    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried_within_budget() {
    let backend = StubBackend::failing_first(CHUNK_SIZE * 10, 1);
    let config = test_config().with_look_ahead(0).with_retry_budget(2);
    let manager = ChunkManager::new(config, backend.clone()).unwrap();
    let object = test_object(CHUNK_SIZE * 10);

    let buf = manager.get_chunk(&object, 0, CHUNK_SIZE).await.unwrap();
    assert_eq!(buf.len(), CHUNK_SIZE as usize);
    assert_eq!(backend.calls_for(0), 2);

    manager.close().await;
}

#[tokio::test]
async fn close_is_idempotent_and_rejects_late_reads() {
    let backend = StubBackend::new(CHUNK_SIZE * 10);
    let manager = ChunkManager::new(test_config(), backend).unwrap();
    let object = test_object(CHUNK_SIZE * 10);

    manager.get_chunk(&object, 0, CHUNK_SIZE).await.unwrap();
    manager.close().await;
    manager.close().await;

    assert_eq!(manager.cached_chunks(), 0);
    let err = manager.get_chunk(&object, 0, CHUNK_SIZE).await.unwrap_err();
    assert!(matches!(err, ChunkError::Internal(_)));
}
