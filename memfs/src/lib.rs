// Library crate for memfs: an in-memory, flat filesystem served over FUSE.
// The binary in main.rs only parses arguments, sets up logging and mounts.

pub mod cli;
pub mod config;
pub mod error;
pub mod fuse;
pub mod meta;
pub mod store;
pub mod vfs;

pub use error::{FsError, Result};
pub use vfs::MemFs;
