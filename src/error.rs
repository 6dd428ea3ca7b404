use thiserror::Error;

/// Every engine operation reports failures through this type.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path component or directory entry absent.
    #[error("not found")]
    NotFound,

    /// Create or link target already resolves.
    #[error("file exists")]
    AlreadyExists,

    /// A path component that must be a directory is not one.
    #[error("not a directory")]
    NotDirectory,

    /// Operation requires a non-directory.
    #[error("is a directory")]
    IsDirectory,

    /// Directory removal attempted on a directory that still has entries.
    #[error("directory not empty")]
    NotEmpty,

    /// Path or path component exceeds the fixed length limits.
    #[error("name too long")]
    NameTooLong,

    /// Logical block index or size outside the addressable range.
    #[error("invalid argument")]
    InvalidArgument,

    /// No free block available.
    #[error("no space left on device")]
    OutOfSpace,

    /// Operation refused on the root directory.
    #[error("operation not permitted")]
    PermissionDenied,

    /// Superblock magic or geometry does not describe a usable volume.
    #[error("invalid superblock")]
    InvalidSuperBlock,

    /// Block number 0 or beyond the end of the volume.
    #[error("invalid block number {0}")]
    InvalidBlockId(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// POSIX errno for replying to a filesystem-call adapter.
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::AlreadyExists => libc::EEXIST,
            Self::NotDirectory => libc::ENOTDIR,
            Self::IsDirectory => libc::EISDIR,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::InvalidArgument | Self::InvalidSuperBlock => libc::EINVAL,
            Self::OutOfSpace => libc::ENOSPC,
            Self::PermissionDenied => libc::EPERM,
            Self::InvalidBlockId(_) => libc::EIO,
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

pub type Result<T> = core::result::Result<T, FsError>;
