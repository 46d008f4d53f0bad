use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Default data block size: 64 MiB.
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024 * 1024;
/// Default number of file slots in the root directory.
pub const DEFAULT_CAPACITY: usize = 10;
/// Default size of the descriptor pool.
pub const DEFAULT_MAX_FD: u64 = 65535;
/// 64 bytes including the C string terminator.
pub const DEFAULT_NAME_MAX: usize = 63;
pub const DEFAULT_THREADS: usize = 4;

const MAX_CAPACITY: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of slots in the file table.
    pub capacity: usize,
    /// Descriptors are drawn from `[0, max_fd)`.
    pub max_fd: u64,
    pub block_size: u64,
    /// Longest accepted file name, in bytes.
    pub name_max: usize,
    /// Worker threads servicing FUSE requests.
    pub threads: usize,
    /// Entry/attribute cache validity handed to the kernel.
    pub ttl_secs: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_fd: DEFAULT_MAX_FD,
            block_size: DEFAULT_BLOCK_SIZE,
            name_max: DEFAULT_NAME_MAX,
            threads: DEFAULT_THREADS,
            ttl_secs: 1,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            bail!("capacity must be within 1..={MAX_CAPACITY}, got {}", self.capacity);
        }
        if self.max_fd == 0 {
            bail!("max_fd must be at least 1");
        }
        if self.block_size == 0 || usize::try_from(self.block_size).is_err() {
            bail!("block_size {} is not addressable", self.block_size);
        }
        if self.name_max == 0 || self.name_max > 255 {
            bail!("name_max must be within 1..=255, got {}", self.name_max);
        }
        if self.threads == 0 {
            bail!("threads must be at least 1");
        }
        Ok(())
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let cfg: Config = serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    cfg.validate()?;
    Ok(cfg)
}
