use clap::Parser;
use std::path::PathBuf;

use crate::config::{Config, load_config};

#[derive(Parser, Debug)]
#[command(version, about = "In-memory flat filesystem over FUSE", long_about = None)]
pub struct Args {
    /// Path to mount point
    pub mountpoint: PathBuf,

    /// YAML configuration file
    #[arg(short, long, env = "MEMFS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Worker threads servicing requests
    #[arg(short, long, env = "MEMFS_THREADS")]
    pub threads: Option<usize>,

    /// Number of file slots
    #[arg(long, env = "MEMFS_CAPACITY")]
    pub capacity: Option<usize>,

    /// Data block size in bytes
    #[arg(long, env = "MEMFS_BLOCK_SIZE")]
    pub block_size: Option<u64>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "MEMFS_LOG")]
    pub log_level: Option<String>,

    /// Let other users access the mount
    #[arg(long, default_value_t = false)]
    pub allow_other: bool,

    /// Mount directly instead of going through fusermount3
    #[arg(long, default_value_t = false)]
    pub privileged: bool,
}

impl Args {
    /// Config file (or defaults) with command line overrides applied on top.
    pub fn resolve_config(&self) -> anyhow::Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => load_config(path)?,
            None => Config::default(),
        };
        if let Some(threads) = self.threads {
            cfg.threads = threads;
        }
        if let Some(capacity) = self.capacity {
            cfg.capacity = capacity;
        }
        if let Some(block_size) = self.block_size {
            cfg.block_size = block_size;
        }
        if let Some(level) = &self.log_level {
            cfg.log_level = level.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}
