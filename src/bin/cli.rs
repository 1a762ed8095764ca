// src/bin/cli.rs
//
//! CLI supporting `mount` and `check`.
//!
//! Examples:
//! ```bash
//! rangefs mount drive.json /mnt/drive
//! rangefs mount drive.json /mnt/drive -o allow_other -o fs_name=drive \
//!     --chunk-size 4194304 --max-chunks 128 --look-ahead 4
//! rangefs check drive.json
//! ```
//!
//! Logging is controlled through `RUST_LOG` (default `rangefs=info`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rangefs::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_LOOK_AHEAD, DEFAULT_MAX_CHUNKS, DEFAULT_NUM_WORKERS,
    DEFAULT_RETRY_BUDGET,
};
use rangefs::{
    ChunkManager, HttpBackend, HttpBackendConfig, ManagerConfig, ManifestIndex, MetadataCache,
    MetadataSource,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mount a manifest-described object store as a read-only filesystem.
    Mount {
        /// Path to the JSON manifest describing the remote objects.
        manifest: PathBuf,

        /// Directory to mount at (created if missing).
        mountpoint: PathBuf,

        /// Mount options, repeatable (e.g. -o allow_other -o fs_name=drive).
        #[arg(short = 'o', long = "option")]
        options: Vec<String>,

        /// Chunk size in bytes.
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u64,

        /// Chunk cache capacity, in chunks.
        #[arg(long, default_value_t = DEFAULT_MAX_CHUNKS)]
        max_chunks: usize,

        /// Number of concurrent fetch workers.
        #[arg(long, default_value_t = DEFAULT_NUM_WORKERS)]
        workers: usize,

        /// Chunks to fetch ahead of each read.
        #[arg(long, default_value_t = DEFAULT_LOOK_AHEAD)]
        look_ahead: u64,

        /// Per-attempt fetch timeout in seconds.
        #[arg(long, default_value_t = 30)]
        fetch_timeout: u64,

        /// Max retries on transient fetch failures.
        #[arg(long, default_value_t = DEFAULT_RETRY_BUDGET)]
        retry_budget: u32,
    },
    /// Parse a manifest and print a summary without mounting.
    Check {
        /// Path to the JSON manifest.
        manifest: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rangefs=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Mount {
            manifest,
            mountpoint,
            options,
            chunk_size,
            max_chunks,
            workers,
            look_ahead,
            fetch_timeout,
            retry_budget,
        } => {
            let config = ManagerConfig::default()
                .with_chunk_size(chunk_size)
                .with_max_chunks(max_chunks)
                .with_num_workers(workers)
                .with_look_ahead(look_ahead)
                .with_fetch_timeout(Duration::from_secs(fetch_timeout))
                .with_retry_budget(retry_budget);
            mount_cmd(&manifest, &mountpoint, &options, config)
        }
        Command::Check { manifest } => check_cmd(&manifest),
    }
}

fn mount_cmd(
    manifest: &PathBuf,
    mountpoint: &PathBuf,
    options: &[String],
    config: ManagerConfig,
) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;

    let index = Arc::new(ManifestIndex::from_path(manifest)?);
    let metadata: Arc<dyn MetadataSource> = Arc::new(MetadataCache::with_default_ttl(index));
    let backend = Arc::new(HttpBackend::new(HttpBackendConfig::default())?);

    // The fetcher pool spawns onto this runtime; the FUSE session itself
    // stays on the main thread.
    let manager = {
        let _guard = runtime.enter();
        Arc::new(ChunkManager::new(config, backend)?)
    };

    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };
    let served = rangefs::mount::mount(
        metadata,
        Arc::clone(&manager),
        runtime.handle().clone(),
        mountpoint,
        options,
        uid,
        gid,
    );

    runtime.block_on(manager.close());
    served
}

fn check_cmd(manifest: &PathBuf) -> Result<()> {
    let index = ManifestIndex::from_path(manifest)?;
    println!(
        "Manifest OK: {} objects ({})",
        index.len(),
        manifest.display()
    );
    Ok(())
}
