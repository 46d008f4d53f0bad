//! FUSE adapter
//!
//! Implements `rfuse3::raw::Filesystem` for `MemFs`. Each callback hands
//! its arguments to the matching `MemFs` method and turns the result into
//! an rfuse3 reply; `FsError` converts into the errno the kernel expects.
//! Directory entries are streamed back and rfuse3 encodes the dirent
//! buffer.
pub mod mount;

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use rfuse3::Result as FuseResult;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr as FuseFileAttr, ReplyAttr, ReplyCreated,
    ReplyData, ReplyDirectory, ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs,
    ReplyWrite,
};
use rfuse3::raw::{Filesystem, Request};
use rfuse3::{FileType as FuseFileType, SetAttr, Timestamp};
use std::ffi::OsStr;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

use crate::meta::table::TimeUpdate;
use crate::vfs::{DirEntry, FileAttr, FileKind, MemFs};

const MAX_WRITE: NonZeroU32 = NonZeroU32::new(1024 * 1024).unwrap();

impl Filesystem for MemFs {
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        info!("init: max_write {}", MAX_WRITE);
        MemFs::init(self);
        Ok(ReplyInit {
            max_write: MAX_WRITE,
        })
    }

    async fn destroy(&self, _req: Request) {
        info!("destroy");
    }

    async fn lookup(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let entry = MemFs::lookup(self, parent, name)?;
        Ok(ReplyEntry {
            ttl: self.ttl(),
            attr: to_fuse_attr(&entry.attr),
            generation: entry.generation,
        })
    }

    async fn getattr(
        &self,
        _req: Request,
        ino: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let attr = MemFs::getattr(self, ino)?;
        Ok(ReplyAttr {
            ttl: self.ttl(),
            attr: to_fuse_attr(&attr),
        })
    }

    async fn setattr(
        &self,
        _req: Request,
        ino: u64,
        _fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        let update = TimeUpdate {
            atime: set_attr.atime.map(to_system_time),
            mtime: set_attr.mtime.map(to_system_time),
            ctime: set_attr.ctime.map(to_system_time),
        };
        let attr = MemFs::setattr(self, ino, update)?;
        Ok(ReplyAttr {
            ttl: self.ttl(),
            attr: to_fuse_attr(&attr),
        })
    }

    async fn create(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _flags: u32,
    ) -> FuseResult<ReplyCreated> {
        let (entry, fd) = MemFs::create(self, parent, name, mode, req.uid, req.gid)?;
        Ok(ReplyCreated {
            ttl: self.ttl(),
            attr: to_fuse_attr(&entry.attr),
            generation: entry.generation,
            fh: fd,
            flags: 0,
        })
    }

    async fn unlink(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        Ok(MemFs::unlink(self, parent, name)?)
    }

    async fn open(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let fh = MemFs::open(self, ino)?;
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn read(
        &self,
        _req: Request,
        ino: u64,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let data = MemFs::read(self, ino, fh, offset, size as usize)?;
        Ok(ReplyData {
            data: Bytes::from(data),
        })
    }

    async fn write(
        &self,
        _req: Request,
        ino: u64,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        let written = MemFs::write(self, ino, fh, offset, data)?;
        Ok(ReplyWrite {
            written: written as u32,
        })
    }

    async fn release(
        &self,
        _req: Request,
        _inode: u64,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        Ok(MemFs::release(self, fh)?)
    }

    async fn flush(&self, _req: Request, _inode: u64, _fh: u64, _lock_owner: u64) -> FuseResult<()> {
        Ok(())
    }

    async fn fsync(&self, _req: Request, _inode: u64, _fh: u64, _datasync: bool) -> FuseResult<()> {
        Ok(())
    }

    async fn opendir(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        MemFs::opendir(self, ino)?;
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn releasedir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _flags: u32,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        parent: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let start = offset.max(0) as usize;
        let page = MemFs::readdir(self, parent, start, usize::MAX)?;
        let entries = dir_entries(page, start);
        let boxed: Self::DirEntryStream<'a> = Box::pin(stream::iter(entries.into_iter().map(Ok)));
        Ok(ReplyDirectory { entries: boxed })
    }

    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        parent: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        let start = offset as usize;
        let page = MemFs::readdir(self, parent, start, usize::MAX)?;
        let ttl = self.ttl();
        let mut entries = Vec::with_capacity(page.len());
        for (i, e) in page.into_iter().enumerate() {
            // skip files unlinked, or replaced in their slot, since the listing
            let Some(current) = self.entry_for_listing(&e) else {
                continue;
            };
            entries.push(DirectoryEntryPlus {
                inode: e.ino,
                generation: current.generation,
                kind: to_fuse_kind(e.kind),
                name: e.name,
                offset: (start + i + 1) as i64,
                attr: to_fuse_attr(&current.attr),
                entry_ttl: ttl,
                attr_ttl: ttl,
            });
        }
        let boxed: Self::DirEntryPlusStream<'a> =
            Box::pin(stream::iter(entries.into_iter().map(Ok)));
        Ok(ReplyDirectoryPlus { entries: boxed })
    }

    async fn statfs(&self, _req: Request, _ino: u64) -> FuseResult<ReplyStatFs> {
        let st = MemFs::statfs(self);
        Ok(ReplyStatFs {
            blocks: st.blocks,
            bfree: st.bfree,
            bavail: st.bavail,
            files: st.files,
            ffree: st.ffree,
            bsize: st.bsize,
            namelen: st.namelen,
            frsize: st.frsize,
        })
    }

    async fn forget(&self, _req: Request, _inode: u64, _nlookup: u64) {}

    async fn batch_forget(&self, _req: Request, _inodes: &[(u64, u64)]) {}
}

// =============== helpers ===============

/// Number the page so that each entry's offset is the position of the
/// entry after it, which is what the kernel hands back on the next call.
fn dir_entries(page: Vec<DirEntry>, start: usize) -> Vec<DirectoryEntry> {
    page.into_iter()
        .enumerate()
        .map(|(i, e)| DirectoryEntry {
            inode: e.ino,
            kind: to_fuse_kind(e.kind),
            name: e.name,
            offset: (start + i + 1) as i64,
        })
        .collect()
}

fn to_fuse_kind(kind: FileKind) -> FuseFileType {
    match kind {
        FileKind::Directory => FuseFileType::Directory,
        FileKind::RegularFile => FuseFileType::RegularFile,
    }
}

fn to_fuse_attr(attr: &FileAttr) -> FuseFileAttr {
    FuseFileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.blocks(),
        atime: Timestamp::from(attr.atime),
        mtime: Timestamp::from(attr.mtime),
        ctime: Timestamp::from(attr.ctime),
        #[cfg(target_os = "macos")]
        crtime: Timestamp::from(attr.ctime),
        kind: to_fuse_kind(attr.kind),
        perm: attr.perm(),
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: 512,
    }
}

fn to_system_time(ts: Timestamp) -> SystemTime {
    let nanos = Duration::from_nanos(u64::from(ts.nsec));
    if ts.sec >= 0 {
        UNIX_EPOCH + Duration::from_secs(ts.sec as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(ts.sec.unsigned_abs()) + nanos
    }
}
