//! Mount helpers for starting/stopping FUSE
//!
//! Notes:
//! - Only supported on Unix-like systems. On Linux we support unprivileged mount via fusermount3.
//! - These helpers are thin wrappers over rfuse3 raw Session APIs.

use std::path::Path;

use rfuse3::MountOptions;
use rfuse3::raw::{MountHandle, Session};

use crate::vfs::MemFs;

/// Mount options for memfs, owned by the calling user.
pub fn mount_options(allow_other: bool) -> MountOptions {
    // SAFETY: getuid/getgid cannot fail and touch no memory.
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    let mut mo = MountOptions::default();
    mo.fs_name("memfs").uid(uid).gid(gid).allow_other(allow_other);
    mo
}

/// Mount `fs` on an existing directory. Unprivileged mounts go through
/// fusermount3, which must be in PATH.
#[cfg(target_os = "linux")]
pub async fn mount_memfs(
    fs: MemFs,
    mount_point: impl AsRef<Path>,
    opts: MountOptions,
    privileged: bool,
) -> std::io::Result<MountHandle> {
    let session = Session::new(opts);
    if privileged {
        session.mount(fs, mount_point.as_ref()).await
    } else {
        session.mount_with_unprivileged(fs, mount_point.as_ref()).await
    }
}

/// Fallback stub for non-Linux targets.
#[cfg(not(target_os = "linux"))]
pub async fn mount_memfs(
    _fs: MemFs,
    _mount_point: impl AsRef<Path>,
    _opts: MountOptions,
    _privileged: bool,
) -> std::io::Result<MountHandle> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "FUSE mount is only supported on Linux in this build",
    ))
}
