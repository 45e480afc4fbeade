use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("File exists: {0}")]
    AlreadyExists(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Invalid path: {0:?}")]
    InvalidPath(String),

    #[error("File too large: {0}")]
    TooLarge(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mount error: {0}")]
    Mount(String),
}

impl FsError {
    /// POSIX error number for this error.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::InvalidPath(_) => libc::EINVAL,
            FsError::TooLarge(_) => libc::EFBIG,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            FsError::Mount(_) => libc::EIO,
        }
    }

    /// Status code in callback convention: negative errno.
    pub fn status(&self) -> i32 {
        -self.errno()
    }
}

impl From<&FsError> for fuser::Errno {
    fn from(e: &FsError) -> Self {
        match e {
            FsError::NotFound(_) => fuser::Errno::ENOENT,
            FsError::AlreadyExists(_) => fuser::Errno::EEXIST,
            FsError::InvalidPath(_) => fuser::Errno::EINVAL,
            other => fuser::Errno::from(std::io::Error::from_raw_os_error(other.errno())),
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
