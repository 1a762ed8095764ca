// src/backend/http.rs
//
// Production ObjectFetch: ranged HTTPS GETs against each object's
// download_url.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, ClientBuilder, StatusCode};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, trace, warn};

use crate::backend::{CredentialSource, ObjectFetch};
use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_CONCURRENT_FETCHES,
};
use crate::error::ChunkError;
use crate::types::ObjectDescriptor;

/// HTTP client tuning for the fetch path.
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Cap on concurrent range requests across all workers.
    pub max_concurrent_fetches: usize,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout enforced by the client, independent of the
    /// manager's per-attempt timeout.
    pub request_timeout: Duration,
    /// Idle connections kept per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_FETCH_TIMEOUT,
            pool_max_idle_per_host: 16,
        }
    }
}

/// Ranged-GET backend over `reqwest`.
///
/// Sends `Range: bytes=start-end` (inclusive, RFC 7233) and treats a 206
/// body as the chunk. 200 is tolerated (some stores ignore Range and return
/// the whole body); 416 marks a range past EOF and maps to an empty final
/// chunk. 401/403 trigger one serialized credential refresh followed by a
/// single retry.
pub struct HttpBackend {
    client: reqwest::Client,
    credentials: Option<Arc<dyn CredentialSource>>,
    permits: Semaphore,
    refresh_gate: Mutex<()>,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .tcp_nodelay(true)
            .use_rustls_tls()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            credentials: None,
            permits: Semaphore::new(config.max_concurrent_fetches.max(1)),
            refresh_gate: Mutex::new(()),
        })
    }

    /// Attach a credential source; fetches then carry its bearer token.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    async fn attempt(
        &self,
        object: &ObjectDescriptor,
        range_start: u64,
        range_len: u64,
    ) -> Result<Bytes, ChunkError> {
        let mut request = self
            .client
            .get(&object.download_url)
            .header(header::RANGE, range_header(range_start, range_len));

        if let Some(credentials) = &self.credentials {
            let token = credentials
                .token()
                .await
                .map_err(|e| ChunkError::Auth(format!("credential source failed: {e}")))?;
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChunkError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::PARTIAL_CONTENT {
            response
                .bytes()
                .await
                .map_err(|e| ChunkError::Transient(format!("body read failed: {e}")))
        } else if status == StatusCode::OK {
            // Some stores ignore Range and return the whole object; cut the
            // requested window out so the caller still gets exactly its chunk.
            trace!(
                "Backend ignored Range for {}, slicing full body",
                object.object_id
            );
            let body = response
                .bytes()
                .await
                .map_err(|e| ChunkError::Transient(format!("body read failed: {e}")))?;
            Ok(body_window(body, range_start, range_len))
        } else if status == StatusCode::RANGE_NOT_SATISFIABLE {
            trace!(
                "Range {}+{} past EOF of {}",
                range_start, range_len, object.object_id
            );
            Ok(Bytes::new())
        } else {
            Err(classify_status(status, &object.object_id))
        }
    }

    /// Serialize refreshes so a burst of 401s triggers them one at a time.
    async fn refresh_credentials(&self, credentials: &Arc<dyn CredentialSource>) -> Result<(), ChunkError> {
        let _gate = self.refresh_gate.lock().await;
        debug!("Refreshing backend credentials");
        credentials
            .refresh()
            .await
            .map_err(|e| ChunkError::Auth(format!("credential refresh failed: {e}")))
    }
}

#[async_trait]
impl ObjectFetch for HttpBackend {
    async fn fetch(
        &self,
        object: &ObjectDescriptor,
        range_start: u64,
        range_len: u64,
    ) -> Result<Bytes, ChunkError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ChunkError::Internal("fetch semaphore closed".into()))?;

        match self.attempt(object, range_start, range_len).await {
            Err(ChunkError::Auth(reason)) if self.credentials.is_some() => {
                warn!(
                    "Fetch of {} rejected ({}), refreshing credentials",
                    object.object_id, reason
                );
                let credentials = self.credentials.as_ref().unwrap();
                self.refresh_credentials(credentials).await?;
                self.attempt(object, range_start, range_len).await
            }
            result => result,
        }
    }
}

/// RFC 7233 byte-range header value: `bytes=start-end`, end inclusive.
fn range_header(start: u64, len: u64) -> String {
    format!("bytes={}-{}", start, start + len.max(1) - 1)
}

/// Cut the requested range out of a full 200 body, clamped to its length.
fn body_window(body: Bytes, start: u64, len: u64) -> Bytes {
    let body_len = body.len() as u64;
    let start = start.min(body_len);
    let end = start.saturating_add(len).min(body_len);
    body.slice(start as usize..end as usize)
}

/// Map a non-success status onto the error kinds the chunk core retries or
/// surfaces.
fn classify_status(status: StatusCode, object_id: &str) -> ChunkError {
    if status == StatusCode::NOT_FOUND {
        ChunkError::NotFound(object_id.to_string())
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ChunkError::Auth(format!("{status} for {object_id}"))
    } else if status.is_server_error() {
        ChunkError::Transient(format!("{status} for {object_id}"))
    } else {
        ChunkError::Internal(format!("unexpected status {status} for {object_id}"))
    }
}
