// src/metadata.rs
//
// Directory metadata: the interface the filesystem bridge consumes, plus a
// TTL'd read-through cache so lookup/readdir bursts do not hammer the
// remote index.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use crate::constants::DEFAULT_METADATA_TTL;
use crate::types::ObjectDescriptor;

/// Read-only view of the remote directory tree.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Descriptor of the root directory.
    async fn get_root(&self) -> Result<ObjectDescriptor>;

    /// All objects whose parent is `parent`.
    async fn get_objects_by_parent(&self, parent: &str) -> Result<Vec<ObjectDescriptor>>;

    /// Single-name lookup under `parent`. `None` when no such child exists.
    async fn get_object_by_parent_and_name(
        &self,
        parent: &str,
        name: &str,
    ) -> Result<Option<ObjectDescriptor>>;
}

struct CachedListing {
    objects: Vec<ObjectDescriptor>,
    cached_at: Instant,
}

/// TTL cache wrapped around any [`MetadataSource`].
///
/// Listings are cached per parent ID; name lookups are served from a fresh
/// cached listing when one exists and fall through to the inner source
/// otherwise. Entries expire by age; there is no size bound, since directory
/// listings are tiny next to chunk buffers.
pub struct MetadataCache {
    inner: Arc<dyn MetadataSource>,
    ttl: Duration,
    root: RwLock<Option<(ObjectDescriptor, Instant)>>,
    listings: RwLock<HashMap<String, CachedListing>>,
}

impl MetadataCache {
    pub fn new(inner: Arc<dyn MetadataSource>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            root: RwLock::new(None),
            listings: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_default_ttl(inner: Arc<dyn MetadataSource>) -> Self {
        Self::new(inner, DEFAULT_METADATA_TTL)
    }

    /// Drop every cached entry.
    pub async fn clear(&self) {
        self.root.write().await.take();
        self.listings.write().await.clear();
    }
}

#[async_trait]
impl MetadataSource for MetadataCache {
    async fn get_root(&self) -> Result<ObjectDescriptor> {
        if let Some((root, cached_at)) = self.root.read().await.as_ref() {
            if cached_at.elapsed() < self.ttl {
                trace!("Metadata cache hit: root");
                return Ok(root.clone());
            }
        }
        let root = self.inner.get_root().await?;
        *self.root.write().await = Some((root.clone(), Instant::now()));
        Ok(root)
    }

    async fn get_objects_by_parent(&self, parent: &str) -> Result<Vec<ObjectDescriptor>> {
        if let Some(entry) = self.listings.read().await.get(parent) {
            if entry.cached_at.elapsed() < self.ttl {
                trace!("Metadata cache hit: listing of {}", parent);
                return Ok(entry.objects.clone());
            }
        }
        let objects = self.inner.get_objects_by_parent(parent).await?;
        self.listings.write().await.insert(
            parent.to_string(),
            CachedListing {
                objects: objects.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(objects)
    }

    async fn get_object_by_parent_and_name(
        &self,
        parent: &str,
        name: &str,
    ) -> Result<Option<ObjectDescriptor>> {
        if let Some(entry) = self.listings.read().await.get(parent) {
            if entry.cached_at.elapsed() < self.ttl {
                trace!("Metadata cache hit: {}/{}", parent, name);
                return Ok(entry.objects.iter().find(|o| o.name == name).cloned());
            }
        }
        self.inner.get_object_by_parent_and_name(parent, name).await
    }
}
