use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use memfs::MemFs;
use memfs::cli::Args;
use memfs::config::Config;
use memfs::fuse::mount::{mount_memfs, mount_options};

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = args.resolve_config()?;
    init_tracing(&cfg);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.threads)
        .thread_name("memfs-worker")
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run(args, cfg))
}

async fn run(args: Args, cfg: Config) -> anyhow::Result<()> {
    info!(
        "mounting memfs at {} ({} slots, {} byte blocks, {} workers)",
        args.mountpoint.display(),
        cfg.capacity,
        cfg.block_size,
        cfg.threads
    );
    let fs = MemFs::new(&cfg);
    let mut mount_handle = mount_memfs(
        fs,
        &args.mountpoint,
        mount_options(args.allow_other),
        args.privileged,
    )
    .await
    .with_context(|| format!("mount at {} failed", args.mountpoint.display()))?;

    let handle = &mut mount_handle;
    tokio::select! {
        res = handle => {
            if let Err(e) = res {
                error!("fuse session ended with error: {e}");
                return Err(e.into());
            }
        }
        _ = signal::ctrl_c() => {
            info!("unmounting {}", args.mountpoint.display());
            mount_handle.unmount().await.context("unmount failed")?;
        }
    }
    info!("bye");
    Ok(())
}
