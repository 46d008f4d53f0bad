//! Open-file handles keyed by descriptor.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{FsError, Result};
use crate::meta::fd::{DescriptorAllocator, Fd};
use crate::meta::table::FileEntry;

/// One open instance of a file. Several handles may point at the same entry.
pub struct OpenHandle {
    fd: Fd,
    entry: Arc<FileEntry>,
}

impl OpenHandle {
    pub fn fd(&self) -> Fd {
        self.fd
    }

    pub fn ino(&self) -> u64 {
        self.entry.ino()
    }

    pub fn entry(&self) -> &Arc<FileEntry> {
        &self.entry
    }

    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.entry.read(offset, len)
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> Result<usize> {
        self.entry.write(offset, data)
    }
}

/// Descriptor -> handle map. Has its own lock, independent of the file
/// table, so opening and closing never waits on table edits.
pub struct HandleRegistry {
    fds: Arc<DescriptorAllocator>,
    open: Mutex<HashMap<Fd, Arc<OpenHandle>>>,
}

impl HandleRegistry {
    pub fn new(fds: Arc<DescriptorAllocator>) -> Self {
        Self {
            fds,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn open(&self, entry: Arc<FileEntry>) -> Result<Fd> {
        let fd = self.fds.acquire()?;
        let handle = Arc::new(OpenHandle { fd, entry });
        self.open.lock().insert(fd, handle);
        Ok(fd)
    }

    pub fn get(&self, fd: Fd) -> Result<Arc<OpenHandle>> {
        self.open
            .lock()
            .get(&fd)
            .cloned()
            .ok_or(FsError::BadDescriptor)
    }

    /// Drop the handle and return its descriptor to the pool.
    pub fn close(&self, fd: Fd) -> Result<()> {
        let removed = self.open.lock().remove(&fd);
        match removed {
            Some(_) => {
                self.fds.release(fd);
                Ok(())
            }
            None => Err(FsError::BadDescriptor),
        }
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.open.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
