// src/fs.rs
//
// FUSE bridge: decodes kernel requests into (object, offset, size) tuples
// and answers them from the metadata layer and the chunk manager.
//
// The filesystem is read-only end to end; write-path operations are simply
// not implemented, so the kernel sees ENOSYS for them.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEntry, ReplyOpen,
    Request,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::ChunkError;
use crate::manager::ChunkManager;
use crate::metadata::MetadataSource;
use crate::types::ObjectDescriptor;

/// How long the kernel may cache entries and attributes.
const KERNEL_TTL: Duration = Duration::from_secs(1);

/// Reported block size for stat(2).
const BLOCK_SIZE: u32 = 4096;

/// Bidirectional inode ↔ object mapping.
///
/// Inodes are handed out on first sight of an object ID and stay stable for
/// the lifetime of the mount; descriptors are refreshed in place when the
/// metadata layer returns a newer copy.
struct InodeTable {
    by_ino: HashMap<u64, ObjectDescriptor>,
    ino_by_id: HashMap<String, u64>,
    next_ino: u64,
}

impl InodeTable {
    fn new(root: ObjectDescriptor) -> Self {
        let mut by_ino = HashMap::new();
        let mut ino_by_id = HashMap::new();
        ino_by_id.insert(root.object_id.clone(), fuser::FUSE_ROOT_ID);
        by_ino.insert(fuser::FUSE_ROOT_ID, root);
        Self {
            by_ino,
            ino_by_id,
            next_ino: fuser::FUSE_ROOT_ID + 1,
        }
    }

    fn intern(&mut self, object: ObjectDescriptor) -> u64 {
        match self.ino_by_id.get(&object.object_id) {
            Some(&ino) => {
                self.by_ino.insert(ino, object);
                ino
            }
            None => {
                let ino = self.next_ino;
                self.next_ino += 1;
                self.ino_by_id.insert(object.object_id.clone(), ino);
                self.by_ino.insert(ino, object);
                ino
            }
        }
    }

    fn get(&self, ino: u64) -> Option<ObjectDescriptor> {
        self.by_ino.get(&ino).cloned()
    }
}

/// The mounted filesystem.
pub struct RemoteFs {
    metadata: Arc<dyn MetadataSource>,
    manager: Arc<ChunkManager>,
    runtime: tokio::runtime::Handle,
    inodes: Arc<Mutex<InodeTable>>,
    uid: u32,
    gid: u32,
}

impl RemoteFs {
    /// Resolve the root descriptor and build the filesystem. Must be called
    /// off the runtime (the fuser session thread qualifies).
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        manager: Arc<ChunkManager>,
        runtime: tokio::runtime::Handle,
        uid: u32,
        gid: u32,
    ) -> anyhow::Result<Self> {
        let root = runtime.block_on(metadata.get_root())?;
        debug!("Filesystem root is object {}", root.object_id);
        Ok(Self {
            metadata,
            manager,
            runtime,
            inodes: Arc::new(Mutex::new(InodeTable::new(root))),
            uid,
            gid,
        })
    }

    fn attr_for(&self, ino: u64, object: &ObjectDescriptor) -> FileAttr {
        let mtime = object.modified.unwrap_or(UNIX_EPOCH);
        let (kind, perm, size) = if object.is_dir {
            (FileType::Directory, 0o755, 0)
        } else {
            (FileType::RegularFile, 0o644, object.size)
        };
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(512),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind,
            perm,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }
}

fn errno_for(err: &ChunkError) -> libc::c_int {
    match err {
        ChunkError::NotFound(_) => libc::ENOENT,
        _ => libc::EIO,
    }
}

impl Filesystem for RemoteFs {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_obj) = self.inodes.lock().get(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };

        let lookup = self
            .runtime
            .block_on(self.metadata.get_object_by_parent_and_name(&parent_obj.object_id, name));
        match lookup {
            Ok(Some(object)) => {
                let ino = self.inodes.lock().intern(object.clone());
                reply.entry(&KERNEL_TTL, &self.attr_for(ino, &object), 0);
            }
            Ok(None) => reply.error(libc::ENOENT),
            Err(err) => {
                warn!("Lookup of {:?} under {} failed: {}", name, parent_obj.object_id, err);
                reply.error(libc::EIO);
            }
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        match self.inodes.lock().get(ino) {
            Some(object) => reply.attr(&KERNEL_TTL, &self.attr_for(ino, &object)),
            None => reply.error(libc::ENOENT),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(dir) = self.inodes.lock().get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if !dir.is_dir {
            reply.error(libc::ENOTDIR);
            return;
        }

        let listing = self
            .runtime
            .block_on(self.metadata.get_objects_by_parent(&dir.object_id));
        let objects = match listing {
            Ok(objects) => objects,
            Err(err) => {
                warn!("Listing of {} failed: {}", dir.object_id, err);
                reply.error(libc::EIO);
                return;
            }
        };

        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (ino, FileType::Directory, "..".to_string()),
        ];
        {
            let mut inodes = self.inodes.lock();
            for object in objects {
                let kind = if object.is_dir {
                    FileType::Directory
                } else {
                    FileType::RegularFile
                };
                let name = object.name.clone();
                let child_ino = inodes.intern(object);
                entries.push((child_ino, kind, name));
            }
        }

        for (i, (entry_ino, kind, name)) in
            entries.into_iter().enumerate().skip(offset as usize)
        {
            // reply.add returns true once the kernel buffer is full.
            if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(object) = self.inodes.lock().get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if object.is_dir {
            reply.error(libc::EISDIR);
            return;
        }
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            reply.error(libc::EROFS);
            return;
        }
        reply.opened(0, 0);
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(object) = self.inodes.lock().get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }

        // Each kernel read becomes one chunk-manager request; the reply may
        // be shorter than requested when the range crosses a chunk boundary
        // and the kernel re-issues a read for the remainder.
        let manager = Arc::clone(&self.manager);
        self.runtime.spawn(async move {
            match manager.get_chunk(&object, offset as u64, size as u64).await {
                Ok(buf) => reply.data(&buf),
                Err(err) => {
                    warn!("Read of {} at {} failed: {}", object.object_id, offset, err);
                    reply.error(errno_for(&err));
                }
            }
        });
    }
}
