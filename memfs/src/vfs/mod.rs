//! VFS layer
//!
//! Responsibilities:
//! - Own the service objects (file table, descriptor pool, handle registry)
//!   built once from `Config`.
//! - Implement every filesystem request against them with protocol-neutral
//!   types, returning `FsError` on failure. The FUSE glue in `crate::fuse`
//!   only converts these results into replies.
//!
//! The namespace is flat: inode 1 is the only directory and every file
//! lives directly under it.
//!
//! Submodules:
//! - `handles`: open-file handles and the descriptor -> handle registry
pub mod handles;

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{FsError, Result};
use crate::meta::fd::{DescriptorAllocator, Fd};
use crate::meta::table::{FileEntry, FileTable, ROOT_INO, TimeUpdate};
use crate::store::BlockLayout;
use handles::HandleRegistry;

/// Block size reported through statfs.
const STATFS_BSIZE: u32 = 512;
const STATFS_BLOCKS: u64 = 4096;
const STATFS_BFREE: u64 = 2048;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    RegularFile,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileAttr {
    pub ino: u64,
    pub kind: FileKind,
    /// Full mode, type bits included.
    pub mode: u32,
    pub size: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl FileAttr {
    pub fn perm(&self) -> u16 {
        (self.mode & 0o7777) as u16
    }

    /// Size in 512-byte units, as stat(2) reports it.
    pub fn blocks(&self) -> u64 {
        self.size.div_ceil(512)
    }
}

/// Reply to lookup and create.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub attr: FileAttr,
    pub generation: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub kind: FileKind,
    pub name: OsString,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatFs {
    pub bsize: u32,
    pub frsize: u32,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub namelen: u32,
}

pub struct MemFs {
    table: FileTable,
    handles: HandleRegistry,
    name_max: usize,
    ttl: Duration,
    uid: u32,
    gid: u32,
    started: SystemTime,
}

impl MemFs {
    /// Build a filesystem owned by the calling process' user.
    pub fn new(cfg: &Config) -> Self {
        // SAFETY: getuid/getgid cannot fail and touch no memory.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self::with_owner(cfg, uid, gid)
    }

    pub fn with_owner(cfg: &Config, uid: u32, gid: u32) -> Self {
        let fds = Arc::new(DescriptorAllocator::new(cfg.max_fd));
        Self {
            table: FileTable::new(cfg.capacity, BlockLayout::new(cfg.block_size)),
            handles: HandleRegistry::new(fds),
            name_max: cfg.name_max,
            ttl: Duration::from_secs(cfg.ttl_secs),
            uid,
            gid,
            started: SystemTime::now(),
        }
    }

    pub fn table(&self) -> &FileTable {
        &self.table
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    /// Cache validity for entry and attribute replies.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Called once before any request is served.
    pub fn init(&self) {
        info!(
            "initializing file table with {} slots",
            self.table.capacity()
        );
        self.table.reset();
    }

    fn check_name(&self, name: &OsStr) -> Result<()> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.contains(&b'/') || bytes.contains(&0) {
            return Err(FsError::InvalidArgument);
        }
        if bytes.len() > self.name_max {
            return Err(FsError::NameTooLong);
        }
        Ok(())
    }

    fn root_attr(&self) -> FileAttr {
        FileAttr {
            ino: ROOT_INO,
            kind: FileKind::Directory,
            mode: libc::S_IFDIR | 0o755,
            size: 0,
            nlink: 2,
            uid: self.uid,
            gid: self.gid,
            atime: self.started,
            mtime: self.started,
            ctime: self.started,
        }
    }

    fn file_attr(entry: &FileEntry) -> FileAttr {
        let times = entry.times();
        FileAttr {
            ino: entry.ino(),
            kind: FileKind::RegularFile,
            mode: entry.mode(),
            size: entry.size(),
            nlink: 1,
            uid: entry.uid(),
            gid: entry.gid(),
            atime: times.atime,
            mtime: times.mtime,
            ctime: times.ctime,
        }
    }

    fn entry_reply(entry: &FileEntry) -> Entry {
        Entry {
            attr: Self::file_attr(entry),
            generation: entry.generation(),
        }
    }

    pub fn lookup(&self, parent: u64, name: &OsStr) -> Result<Entry> {
        debug!("lookup: parent {parent}, name {name:?}");
        self.check_name(name)?;
        if parent != ROOT_INO {
            return Err(FsError::NotFound);
        }
        let entry = self.table.find_by_name(name).ok_or(FsError::NotFound)?;
        Ok(Self::entry_reply(&entry))
    }

    pub fn getattr(&self, ino: u64) -> Result<FileAttr> {
        debug!("getattr: inode {ino}");
        if ino == ROOT_INO {
            return Ok(self.root_attr());
        }
        let entry = self.table.find_by_inode(ino).ok_or(FsError::NotFound)?;
        Ok(Self::file_attr(&entry))
    }

    /// Apply the requested timestamps; every other field is left alone.
    pub fn setattr(&self, ino: u64, update: TimeUpdate) -> Result<FileAttr> {
        debug!("setattr: inode {ino}, {update:?}");
        if ino <= ROOT_INO {
            return Err(FsError::IsDirectory);
        }
        let entry = self.table.find_by_inode(ino).ok_or(FsError::NotFound)?;
        entry.set_times(update);
        Ok(Self::file_attr(&entry))
    }

    /// Create a file and open it; the returned descriptor is already live.
    pub fn create(
        &self,
        parent: u64,
        name: &OsStr,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<(Entry, Fd)> {
        debug!("create: name {name:?}, mode {mode:o}");
        if parent != ROOT_INO {
            return Err(FsError::NotFound);
        }
        self.check_name(name)?;
        let (entry, fd) = self
            .table
            .create(name, mode, uid, gid, &self.handles)
            .inspect_err(|e| warn!("create {name:?} failed: {e}"))?;
        Ok((Self::entry_reply(&entry), fd))
    }

    pub fn unlink(&self, parent: u64, name: &OsStr) -> Result<()> {
        debug!("unlink: name {name:?}");
        // a name that could never have been created simply does not exist
        if parent != ROOT_INO || self.check_name(name).is_err() {
            return Err(FsError::NotFound);
        }
        self.table.unlink(name)
    }

    pub fn open(&self, ino: u64) -> Result<Fd> {
        debug!("open: inode {ino}");
        if ino <= ROOT_INO {
            return Err(FsError::IsDirectory);
        }
        let entry = self.table.find_by_inode(ino).ok_or(FsError::NotFound)?;
        self.handles.open(entry)
    }

    pub fn opendir(&self, ino: u64) -> Result<()> {
        debug!("opendir: inode {ino}");
        if ino != ROOT_INO {
            return Err(FsError::NotDirectory);
        }
        Ok(())
    }

    fn handle_for(&self, ino: u64, fd: Fd) -> Result<Arc<handles::OpenHandle>> {
        if ino <= ROOT_INO {
            return Err(FsError::IsDirectory);
        }
        let handle = self.handles.get(fd).inspect_err(|_| {
            warn!("file not found, inode: {ino}, fd: {fd}");
        })?;
        if handle.ino() != ino {
            warn!("fd {fd} is bound to inode {}, not {ino}", handle.ino());
            return Err(FsError::BadDescriptor);
        }
        Ok(handle)
    }

    pub fn read(&self, ino: u64, fd: Fd, offset: u64, size: usize) -> Result<Vec<u8>> {
        debug!("read: inode {ino}, fd {fd}, offset {offset}, size {size}");
        self.handle_for(ino, fd)?.read(offset, size)
    }

    pub fn write(&self, ino: u64, fd: Fd, offset: u64, data: &[u8]) -> Result<usize> {
        debug!(
            "write: inode {ino}, fd {fd}, offset {offset}, size {}",
            data.len()
        );
        self.handle_for(ino, fd)?.write(offset, data)
    }

    pub fn release(&self, fd: Fd) -> Result<()> {
        debug!("release: fd {fd}");
        self.handles
            .close(fd)
            .inspect_err(|_| warn!("release of unknown fd {fd}"))
    }

    /// Full listing of the root: `.`, `..`, then every file in slot order.
    pub fn list_root(&self) -> Vec<DirEntry> {
        let dot = |name: &str| DirEntry {
            ino: ROOT_INO,
            kind: FileKind::Directory,
            name: OsString::from(name),
        };
        let mut all = vec![dot("."), dot("..")];
        all.extend(self.table.list().into_iter().map(|(name, ino)| DirEntry {
            ino,
            kind: FileKind::RegularFile,
            name,
        }));
        all
    }

    /// Current entry for a listed name, or `None` if the file is gone or
    /// its slot now holds another file.
    pub fn entry_for_listing(&self, listed: &DirEntry) -> Option<Entry> {
        if listed.ino == ROOT_INO {
            return Some(Entry {
                attr: self.root_attr(),
                generation: 0,
            });
        }
        let entry = self.table.find_by_inode(listed.ino)?;
        (entry.name() == listed.name.as_os_str()).then(|| Self::entry_reply(&entry))
    }

    /// Entries `[offset, offset + max)` of the root listing, clipped to its
    /// length. An offset past the end yields an empty page.
    pub fn readdir(&self, ino: u64, offset: usize, max: usize) -> Result<Vec<DirEntry>> {
        debug!("readdir: inode {ino}, offset {offset}");
        if ino != ROOT_INO {
            return Err(FsError::NotDirectory);
        }
        let all = self.list_root();
        if offset >= all.len() {
            return Ok(Vec::new());
        }
        let end = offset.saturating_add(max).min(all.len());
        Ok(all[offset..end].to_vec())
    }

    pub fn statfs(&self) -> StatFs {
        let files = self.table.capacity() as u64;
        StatFs {
            bsize: STATFS_BSIZE,
            frsize: STATFS_BSIZE,
            blocks: STATFS_BLOCKS,
            bfree: STATFS_BFREE,
            bavail: STATFS_BFREE,
            files,
            ffree: files,
            namelen: self.name_max as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_fs() -> MemFs {
        let cfg = Config {
            capacity: 3,
            max_fd: 8,
            block_size: 32,
            ..Config::default()
        };
        MemFs::with_owner(&cfg, 1000, 1000)
    }

    #[test]
    fn test_root_attr_and_dir_checks() {
        let fs = small_fs();
        let attr = fs.getattr(ROOT_INO).unwrap();
        assert_eq!(attr.kind, FileKind::Directory);
        assert_eq!(attr.nlink, 2);
        assert_eq!(attr.perm(), 0o755);

        assert_eq!(fs.open(ROOT_INO), Err(FsError::IsDirectory));
        assert_eq!(
            fs.setattr(ROOT_INO, TimeUpdate::default()).err(),
            Some(FsError::IsDirectory)
        );
        assert_eq!(fs.read(ROOT_INO, 0, 0, 1), Err(FsError::IsDirectory));
        assert_eq!(fs.write(ROOT_INO, 0, 0, b"x"), Err(FsError::IsDirectory));
        assert_eq!(fs.opendir(ROOT_INO), Ok(()));
        assert_eq!(fs.opendir(2), Err(FsError::NotDirectory));
        assert_eq!(fs.readdir(2, 0, 10).err(), Some(FsError::NotDirectory));
    }

    #[test]
    fn test_name_validation() {
        let fs = small_fs();
        let long = "x".repeat(64);
        assert_eq!(
            fs.lookup(ROOT_INO, OsStr::new(&long)).err(),
            Some(FsError::NameTooLong)
        );
        assert_eq!(
            fs.create(ROOT_INO, OsStr::new(&long), 0o644, 0, 0).err(),
            Some(FsError::NameTooLong)
        );
        assert!(fs.create(ROOT_INO, OsStr::new(&"y".repeat(63)), 0o644, 0, 0).is_ok());
        assert_eq!(
            fs.lookup(ROOT_INO, OsStr::new("")).err(),
            Some(FsError::InvalidArgument)
        );
    }

    #[test]
    fn test_wrong_parent_is_not_found() {
        let fs = small_fs();
        let name = OsStr::new("a");
        assert_eq!(fs.create(7, name, 0o644, 0, 0).err(), Some(FsError::NotFound));
        fs.create(ROOT_INO, name, 0o644, 0, 0).unwrap();
        assert_eq!(fs.lookup(2, name).err(), Some(FsError::NotFound));
        assert_eq!(fs.unlink(2, name), Err(FsError::NotFound));
    }

    #[test]
    fn test_create_reports_attrs_and_owner() {
        let fs = small_fs();
        let (entry, fd) = fs.create(ROOT_INO, OsStr::new("a"), 0o640, 42, 43).unwrap();
        assert_eq!(entry.attr.ino, 2);
        assert_eq!(entry.attr.kind, FileKind::RegularFile);
        assert_eq!(entry.attr.perm(), 0o640);
        assert_eq!(entry.attr.size, 0);
        assert_eq!(entry.attr.nlink, 1);
        assert_eq!((entry.attr.uid, entry.attr.gid), (42, 43));
        assert_eq!(entry.generation, 1);
        assert!(fs.handles().get(fd).is_ok());
    }

    #[test]
    fn test_descriptor_bound_to_other_inode() {
        let fs = small_fs();
        let (_, fd_a) = fs.create(ROOT_INO, OsStr::new("a"), 0o644, 0, 0).unwrap();
        fs.create(ROOT_INO, OsStr::new("b"), 0o644, 0, 0).unwrap();
        assert_eq!(fs.write(3, fd_a, 0, b"x"), Err(FsError::BadDescriptor));
        assert_eq!(fs.read(2, 99, 0, 1), Err(FsError::BadDescriptor));
    }

    #[test]
    fn test_write_updates_size_and_mtime() {
        let fs = small_fs();
        let (entry, fd) = fs.create(ROOT_INO, OsStr::new("a"), 0o644, 0, 0).unwrap();
        fs.setattr(
            2,
            TimeUpdate {
                mtime: Some(SystemTime::UNIX_EPOCH),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(fs.write(2, fd, 100, b"abc"), Ok(3));
        let attr = fs.getattr(entry.attr.ino).unwrap();
        assert_eq!(attr.size, 103);
        assert_eq!(attr.blocks(), 1);
        assert!(attr.mtime > SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn test_stale_handle_after_unlink() {
        let fs = small_fs();
        let (_, fd) = fs.create(ROOT_INO, OsStr::new("a"), 0o644, 0, 0).unwrap();
        fs.write(2, fd, 0, b"data").unwrap();
        fs.unlink(ROOT_INO, OsStr::new("a")).unwrap();
        assert_eq!(fs.read(2, fd, 0, 4), Err(FsError::NotFound));
        assert_eq!(fs.getattr(2).err(), Some(FsError::NotFound));
        // the descriptor itself is still registered until release
        assert_eq!(fs.release(fd), Ok(()));
        assert_eq!(fs.release(fd), Err(FsError::BadDescriptor));
    }

    #[test]
    fn test_statfs_constants() {
        let fs = small_fs();
        let st = fs.statfs();
        assert_eq!(st.files, 3);
        assert_eq!(st.ffree, 3);
        assert_eq!(st.bfree, st.bavail);
        assert_eq!(st.namelen, 63);
        assert_eq!(st.bsize, 512);
    }

    #[test]
    fn test_init_resets_table() {
        let fs = small_fs();
        fs.create(ROOT_INO, OsStr::new("a"), 0o644, 0, 0).unwrap();
        fs.init();
        assert!(fs.table().is_empty());
        assert_eq!(fs.lookup(ROOT_INO, OsStr::new("a")).err(), Some(FsError::NotFound));
    }

    #[test]
    fn test_unlink_of_invalid_name_is_not_found() {
        let fs = small_fs();
        let long = "x".repeat(100);
        assert_eq!(fs.unlink(ROOT_INO, OsStr::new(&long)), Err(FsError::NotFound));
        assert_eq!(fs.unlink(ROOT_INO, OsStr::new("")), Err(FsError::NotFound));
        assert_eq!(fs.unlink(ROOT_INO, OsStr::new("a/b")), Err(FsError::NotFound));
    }

    #[test]
    fn test_listing_entry_skips_reused_slot() {
        let fs = small_fs();
        fs.create(ROOT_INO, OsStr::new("a"), 0o644, 0, 0).unwrap();
        let listed = fs.readdir(ROOT_INO, 0, 10).unwrap();
        let old_a = listed[2].clone();
        assert_eq!(fs.entry_for_listing(&old_a).unwrap().attr.ino, 2);
        assert!(fs.entry_for_listing(&listed[0]).is_some());

        fs.unlink(ROOT_INO, OsStr::new("a")).unwrap();
        assert!(fs.entry_for_listing(&old_a).is_none());

        let (c, _) = fs.create(ROOT_INO, OsStr::new("c"), 0o644, 0, 0).unwrap();
        assert_eq!(c.attr.ino, old_a.ino);
        assert!(fs.entry_for_listing(&old_a).is_none());
        let fresh = fs.readdir(ROOT_INO, 2, 1).unwrap();
        assert_eq!(fs.entry_for_listing(&fresh[0]).unwrap().generation, 2);
    }
}
