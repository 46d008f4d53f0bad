//! Fixed-capacity file table.
//!
//! Slots live in a dense arena; slot `i` always hands out inode `i + 2`
//! (inode 1 is the root directory), so inode lookup is an index computation
//! and name lookup goes through an auxiliary map. Both are guarded by a
//! single table-wide mutex that is never held across data I/O.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use super::fd::Fd;
use crate::error::{FsError, Result};
use crate::store::{BlockLayout, BlockStore};
use crate::vfs::handles::HandleRegistry;

pub const ROOT_INO: u64 = 1;
const FIRST_FILE_INO: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimes {
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl FileTimes {
    fn now() -> Self {
        let now = SystemTime::now();
        Self {
            atime: now,
            mtime: now,
            ctime: now,
        }
    }
}

/// Timestamp fields a setattr request asked to change.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeUpdate {
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
    pub ctime: Option<SystemTime>,
}

/// A live regular file: identity, permissions and the data it owns.
pub struct FileEntry {
    name: OsString,
    ino: u64,
    generation: u64,
    mode: u32,
    uid: u32,
    gid: u32,
    times: Mutex<FileTimes>,
    data: BlockStore,
    retired: AtomicBool,
}

impl FileEntry {
    pub fn name(&self) -> &OsStr {
        &self.name
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// How many times the owning slot has been occupied, this one included.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn size(&self) -> u64 {
        self.data.size()
    }

    pub fn times(&self) -> FileTimes {
        *self.times.lock()
    }

    /// False once the file has been unlinked.
    pub fn is_live(&self) -> bool {
        !self.retired.load(Ordering::Acquire)
    }

    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if !self.is_live() {
            return Err(FsError::NotFound);
        }
        Ok(self.data.read(offset, len))
    }

    pub fn write(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        if !self.is_live() {
            return Err(FsError::NotFound);
        }
        let n = self.data.write(offset, buf)?;
        let now = SystemTime::now();
        let mut times = self.times.lock();
        times.mtime = now;
        times.ctime = now;
        Ok(n)
    }

    pub fn set_times(&self, update: TimeUpdate) -> FileTimes {
        let mut times = self.times.lock();
        if let Some(t) = update.atime {
            times.atime = t;
        }
        if let Some(t) = update.mtime {
            times.mtime = t;
        }
        if let Some(t) = update.ctime {
            times.ctime = t;
        }
        *times
    }

    pub fn block_count(&self) -> usize {
        self.data.block_count()
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        self.data.close();
    }
}

#[derive(Default)]
struct Slot {
    entry: Option<Arc<FileEntry>>,
    generation: u64,
}

struct Slots {
    slots: Vec<Slot>,
    by_name: HashMap<OsString, usize>,
}

impl Slots {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::default()).collect(),
            by_name: HashMap::with_capacity(capacity),
        }
    }
}

pub struct FileTable {
    inner: Mutex<Slots>,
    layout: BlockLayout,
    capacity: usize,
}

fn slot_of(ino: u64) -> Option<usize> {
    ino.checked_sub(FIRST_FILE_INO)
        .and_then(|i| usize::try_from(i).ok())
}

impl FileTable {
    pub fn new(capacity: usize, layout: BlockLayout) -> Self {
        Self {
            inner: Mutex::new(Slots::with_capacity(capacity)),
            layout,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.inner.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every file. Slot generations survive so that a reused inode is
    /// still distinguishable from its previous occupant.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.by_name.clear();
        for slot in inner.slots.iter_mut() {
            if let Some(entry) = slot.entry.take() {
                entry.retire();
            }
        }
    }

    pub fn find_by_name(&self, name: &OsStr) -> Option<Arc<FileEntry>> {
        let inner = self.inner.lock();
        let idx = *inner.by_name.get(name)?;
        inner.slots[idx].entry.clone()
    }

    pub fn find_by_inode(&self, ino: u64) -> Option<Arc<FileEntry>> {
        let idx = slot_of(ino)?;
        let inner = self.inner.lock();
        inner.slots.get(idx)?.entry.clone()
    }

    /// Create a file in the first free slot and open it.
    ///
    /// The descriptor is obtained before the slot is committed, so a
    /// `TooManyOpen` failure leaves the table unchanged.
    pub fn create(
        &self,
        name: &OsStr,
        mode: u32,
        uid: u32,
        gid: u32,
        handles: &HandleRegistry,
    ) -> Result<(Arc<FileEntry>, Fd)> {
        let mut inner = self.inner.lock();
        if inner.by_name.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        let idx = inner
            .slots
            .iter()
            .position(|s| s.entry.is_none())
            .ok_or(FsError::NoSpace)?;

        let generation = inner.slots[idx].generation + 1;
        let entry = Arc::new(FileEntry {
            name: name.to_os_string(),
            ino: idx as u64 + FIRST_FILE_INO,
            generation,
            mode: libc::S_IFREG | (mode & 0o7777),
            uid,
            gid,
            times: Mutex::new(FileTimes::now()),
            data: BlockStore::new(self.layout),
            retired: AtomicBool::new(false),
        });
        let fd = handles.open(Arc::clone(&entry))?;

        let slot = &mut inner.slots[idx];
        slot.generation = generation;
        slot.entry = Some(Arc::clone(&entry));
        inner.by_name.insert(name.to_os_string(), idx);
        Ok((entry, fd))
    }

    /// Remove a file by name and release its data. Handles still bound to
    /// the file fail with `NotFound` from then on.
    pub fn unlink(&self, name: &OsStr) -> Result<()> {
        let entry = {
            let mut inner = self.inner.lock();
            let idx = inner.by_name.remove(name).ok_or(FsError::NotFound)?;
            inner.slots[idx].entry.take()
        };
        if let Some(entry) = entry {
            entry.retire();
        }
        Ok(())
    }

    /// `(name, inode)` of every live file, in slot order.
    pub fn list(&self) -> Vec<(OsString, u64)> {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .filter_map(|s| s.entry.as_ref())
            .map(|e| (e.name.clone(), e.ino))
            .collect()
    }
}
