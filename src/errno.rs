//! POSIX-shaped error codes returned by every QuasiFS operation.
//!
//! A `thiserror`-derived enum with an explicit conversion to the `libc`
//! errno it represents, covering the subset of POSIX errno this core
//! actually returns.

use thiserror::Error;

/// Every error a QuasiFS operation can return.
///
/// Internal code works with this type end to end (propagated with `?`); the
/// `errno()`/`from_errno()` pair exists only at boundaries that need the raw
/// POSIX integer (tests, a future syscall-emulation layer).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QfsError {
    #[error("permission denied")]
    Eacces,
    #[error("bad file descriptor")]
    Ebadf,
    #[error("device or resource busy")]
    Ebusy,
    #[error("file exists")]
    Eexist,
    #[error("bad address")]
    Efault,
    #[error("invalid argument")]
    Einval,
    #[error("is a directory")]
    Eisdir,
    #[error("too many levels of symbolic links")]
    Eloop,
    #[error("no such device")]
    Enodev,
    #[error("no such file or directory")]
    Enoent,
    #[error("function not implemented")]
    Enosys,
    #[error("not a directory")]
    Enotdir,
    #[error("directory not empty")]
    Enotempty,
    #[error("operation not permitted")]
    Eperm,
    #[error("read-only file system")]
    Erofs,
    #[error("illegal seek")]
    Espipe,
    #[error("cross-device link")]
    Exdev,
}

impl QfsError {
    /// The `libc` errno constant this variant represents.
    pub const fn errno(self) -> i32 {
        match self {
            QfsError::Eacces => libc::EACCES,
            QfsError::Ebadf => libc::EBADF,
            QfsError::Ebusy => libc::EBUSY,
            QfsError::Eexist => libc::EEXIST,
            QfsError::Efault => libc::EFAULT,
            QfsError::Einval => libc::EINVAL,
            QfsError::Eisdir => libc::EISDIR,
            QfsError::Eloop => libc::ELOOP,
            QfsError::Enodev => libc::ENODEV,
            QfsError::Enoent => libc::ENOENT,
            QfsError::Enosys => libc::ENOSYS,
            QfsError::Enotdir => libc::ENOTDIR,
            QfsError::Enotempty => libc::ENOTEMPTY,
            QfsError::Eperm => libc::EPERM,
            QfsError::Erofs => libc::EROFS,
            QfsError::Espipe => libc::ESPIPE,
            QfsError::Exdev => libc::EXDEV,
        }
    }

    /// This error's representation as a negative return code, the shape
    /// every public API function returns on failure.
    pub const fn as_neg(self) -> i64 {
        -(self.errno() as i64)
    }

    /// Recover a `QfsError` from a raw (positive) `libc` errno, if recognized.
    pub const fn from_errno(e: i32) -> Option<Self> {
        Some(match e {
            libc::EACCES => QfsError::Eacces,
            libc::EBADF => QfsError::Ebadf,
            libc::EBUSY => QfsError::Ebusy,
            libc::EEXIST => QfsError::Eexist,
            libc::EFAULT => QfsError::Efault,
            libc::EINVAL => QfsError::Einval,
            libc::EISDIR => QfsError::Eisdir,
            libc::ELOOP => QfsError::Eloop,
            libc::ENODEV => QfsError::Enodev,
            libc::ENOENT => QfsError::Enoent,
            libc::ENOSYS => QfsError::Enosys,
            libc::ENOTDIR => QfsError::Enotdir,
            libc::ENOTEMPTY => QfsError::Enotempty,
            libc::EPERM => QfsError::Eperm,
            libc::EROFS => QfsError::Erofs,
            libc::ESPIPE => QfsError::Espipe,
            libc::EXDEV => QfsError::Exdev,
            _ => return None,
        })
    }
}

pub type QfsResult<T> = Result<T, QfsError>;
