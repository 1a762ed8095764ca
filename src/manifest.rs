// src/manifest.rs
//
// MetadataSource backed by a JSON manifest of object descriptors: the
// credential-less way to mount a fixed object tree.
//
// Manifest layout:
//
//   {
//     "objects": [
//       { "object_id": "root", "name": "", "is_dir": true },
//       { "object_id": "f1", "name": "movie.mkv", "parent": "root",
//         "size": 1073741824, "download_url": "https://…" }
//     ]
//   }
//
// Exactly one directory entry without a parent is the root.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::metadata::MetadataSource;
use crate::types::ObjectDescriptor;

#[derive(Debug, Deserialize)]
struct Manifest {
    objects: Vec<ObjectDescriptor>,
}

/// In-memory object index parsed from a manifest file.
pub struct ManifestIndex {
    by_id: HashMap<String, ObjectDescriptor>,
    children: HashMap<String, Vec<String>>,
    root_id: String,
}

impl ManifestIndex {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::from_slice(&data)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let manifest: Manifest =
            serde_json::from_slice(data).context("Failed to parse manifest JSON")?;

        let mut by_id = HashMap::new();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut roots = Vec::new();

        for object in manifest.objects {
            if object.object_id.is_empty() {
                bail!("manifest entry {:?} has an empty object_id", object.name);
            }
            if !object.is_dir && object.parent.is_some() && object.download_url.is_empty() {
                bail!("file {:?} has no download_url", object.object_id);
            }
            match &object.parent {
                Some(parent) => children
                    .entry(parent.clone())
                    .or_default()
                    .push(object.object_id.clone()),
                None => roots.push(object.object_id.clone()),
            }
            if by_id.insert(object.object_id.clone(), object).is_some() {
                bail!("duplicate object_id in manifest");
            }
        }

        let root_id = match roots.as_slice() {
            [root] if by_id[root].is_dir => root.clone(),
            [] => bail!("manifest has no root entry (a directory without a parent)"),
            [root] => bail!("root entry {root:?} is not a directory"),
            _ => bail!("manifest has {} parentless entries, expected one", roots.len()),
        };
        for parent in children.keys() {
            if !by_id.contains_key(parent) {
                bail!("manifest references unknown parent {parent:?}");
            }
        }

        debug!(
            "Loaded manifest: {} objects under root {}",
            by_id.len(),
            root_id
        );
        Ok(Self {
            by_id,
            children,
            root_id,
        })
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[async_trait]
impl MetadataSource for ManifestIndex {
    async fn get_root(&self) -> Result<ObjectDescriptor> {
        Ok(self.by_id[&self.root_id].clone())
    }

    async fn get_objects_by_parent(&self, parent: &str) -> Result<Vec<ObjectDescriptor>> {
        Ok(self
            .children
            .get(parent)
            .map(|ids| ids.iter().map(|id| self.by_id[id].clone()).collect())
            .unwrap_or_default())
    }

    async fn get_object_by_parent_and_name(
        &self,
        parent: &str,
        name: &str,
    ) -> Result<Option<ObjectDescriptor>> {
        Ok(self
            .children
            .get(parent)
            .and_then(|ids| ids.iter().find(|id| self.by_id[*id].name == name))
            .map(|id| self.by_id[id].clone()))
    }
}
