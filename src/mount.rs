// src/mount.rs
//
// Mount-option parsing and the blocking mount entry point.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use fuser::MountOption;
use tracing::{debug, info, warn};

use crate::fs::RemoteFs;
use crate::manager::ChunkManager;
use crate::metadata::MetadataSource;

/// Translate `-o`-style option strings into fuser mount options.
///
/// The filesystem is read-only, so `RO` is always present; `read_only` is
/// accepted as a no-op for familiarity. Unknown options are warned about and
/// skipped rather than rejected.
pub fn mount_options(args: &[String]) -> Result<Vec<MountOption>> {
    let mut options = vec![MountOption::RO, MountOption::NoAtime];
    let mut named = false;

    for option in args {
        match option.as_str() {
            "allow_other" => options.push(MountOption::AllowOther),
            "allow_root" => options.push(MountOption::AllowRoot),
            "auto_unmount" => options.push(MountOption::AutoUnmount),
            "default_permissions" => options.push(MountOption::DefaultPermissions),
            "read_only" => {}
            other if other.starts_with("fs_name=") => {
                let name = &other["fs_name=".len()..];
                if name.is_empty() {
                    bail!("fs_name= requires a value");
                }
                options.push(MountOption::FSName(name.to_string()));
                named = true;
            }
            other if other.starts_with("max_readahead=") => {
                let value = &other["max_readahead=".len()..];
                let value: u32 = value
                    .parse()
                    .with_context(|| format!("Could not parse max_readahead value {value:?}"))?;
                options.push(MountOption::CUSTOM(format!("max_readahead={value}")));
            }
            other => warn!("Mount option {:?} is not supported, skipping", other),
        }
    }

    if !named {
        options.push(MountOption::FSName("rangefs".to_string()));
    }
    Ok(options)
}

/// Mount the filesystem and serve kernel requests until it is unmounted
/// (e.g. via `fusermount -u`). Blocks the calling thread; the chunk manager
/// keeps running on its own runtime.
pub fn mount(
    metadata: Arc<dyn MetadataSource>,
    manager: Arc<ChunkManager>,
    runtime: tokio::runtime::Handle,
    mountpoint: &Path,
    args: &[String],
    uid: u32,
    gid: u32,
) -> Result<()> {
    if !mountpoint.exists() {
        debug!("Mountpoint doesn't exist, creating...");
        std::fs::create_dir_all(mountpoint)
            .with_context(|| format!("Could not create mount directory {}", mountpoint.display()))?;
    }

    let options = mount_options(args)?;
    let filesystem = RemoteFs::new(metadata, manager, runtime, uid, gid)?;

    info!("Mounting path {}", mountpoint.display());
    fuser::mount2(filesystem, mountpoint, &options)
        .with_context(|| format!("FUSE mount at {} failed", mountpoint.display()))?;
    info!("Unmounted {}", mountpoint.display());
    Ok(())
}
