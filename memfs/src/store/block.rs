//! A single fixed-size data block guarded by its own reader/writer lock.

use parking_lot::RwLock;

use crate::error::{FsError, Result};

/// Fixed-size byte buffer. The buffer is only reachable through the
/// accessors below, which take the shared lock for reads and the exclusive
/// lock for writes.
pub struct Block {
    data: RwLock<Box<[u8]>>,
}

impl Block {
    /// Allocate a zero-filled block, reporting allocation failure instead of
    /// aborting the process.
    pub fn zeroed(size: usize) -> Result<Self> {
        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(size).map_err(|e| {
            tracing::error!("block allocation of {size} bytes failed: {e}");
            FsError::OutOfMemory
        })?;
        buf.resize(size, 0);
        Ok(Self {
            data: RwLock::new(buf.into_boxed_slice()),
        })
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy bytes starting at `offset` into `out`, clipped at the block end.
    /// Returns the number of bytes copied.
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> usize {
        self.inspect(|buf| {
            if offset >= buf.len() {
                return 0;
            }
            let n = out.len().min(buf.len() - offset);
            out[..n].copy_from_slice(&buf[offset..offset + n]);
            n
        })
    }

    /// Copy `data` into the block at `offset`, clipped at the block end.
    /// Returns the number of bytes written.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> usize {
        self.update(|buf| {
            if offset >= buf.len() {
                return 0;
            }
            let n = data.len().min(buf.len() - offset);
            buf[offset..offset + n].copy_from_slice(&data[..n]);
            n
        })
    }

    /// Run `f` with shared access to the whole buffer.
    pub fn inspect<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.data.read();
        f(&guard)
    }

    /// Run `f` with exclusive access to the whole buffer.
    pub fn update<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.data.write();
        f(&mut guard)
    }
}
