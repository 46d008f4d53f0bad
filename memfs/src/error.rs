//! Error taxonomy shared by the storage engine and the FUSE adapter.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file or inode")]
    NotFound,

    #[error("file name too long")]
    NameTooLong,

    #[error("file table is full")]
    NoSpace,

    #[error("too many open files")]
    TooManyOpen,

    #[error("out of memory while allocating a data block")]
    OutOfMemory,

    #[error("bad file descriptor")]
    BadDescriptor,

    #[error("is a directory")]
    IsDirectory,

    #[error("not a directory")]
    NotDirectory,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("file already exists")]
    AlreadyExists,
}

impl FsError {
    /// The errno the kernel expects for this condition.
    pub fn errno(self) -> libc::c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NameTooLong => libc::ENAMETOOLONG,
            FsError::NoSpace => libc::ENOSPC,
            FsError::TooManyOpen => libc::EMFILE,
            FsError::OutOfMemory => libc::ENOMEM,
            FsError::BadDescriptor => libc::EBADF,
            FsError::IsDirectory => libc::EISDIR,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::AlreadyExists => libc::EEXIST,
        }
    }
}

impl From<FsError> for rfuse3::Errno {
    fn from(e: FsError) -> Self {
        e.errno().into()
    }
}

impl From<FsError> for std::io::Error {
    fn from(e: FsError) -> Self {
        std::io::Error::from_raw_os_error(e.errno())
    }
}
