//! The host adapter contract: the capability interface a host-bound
//! partition calls through before (and independent of) the virtual driver
//! running the same operation.
//!
//! Every verb returns a raw `i64` where a negative value is `-errno` and a
//! non-negative value is a byte count, fd, or plain success code — the same
//! convention the public API uses. No platform adapter ships in this core;
//! `NullHostIO` stands in on platforms without one, and the virtual driver
//! alone decides every outcome.

use std::path::Path;

use crate::errno::QfsError;
use crate::types::{OpenFlags, SeekOrigin, Stat};

/// A host I/O adapter. Every method defaults to `EINVAL` ("not implemented
/// here"); a concrete adapter overrides only the verbs its platform
/// actually backs.
pub trait HostIO {
    fn open(&self, path: &Path, flags: OpenFlags) -> i64 {
        let _ = (path, flags);
        QfsError::Einval.as_neg()
    }

    /// Default: `Open(path, CREAT|WRONLY|TRUNC)`.
    fn creat(&self, path: &Path) -> i64 {
        self.open(path, OpenFlags::CREAT | OpenFlags::WRONLY | OpenFlags::TRUNC)
    }

    fn close(&self, fd: i32) -> i64 {
        let _ = fd;
        QfsError::Einval.as_neg()
    }

    fn read(&self, fd: i32, buf: &mut [u8]) -> i64 {
        let _ = (fd, buf);
        QfsError::Einval.as_neg()
    }

    fn pread(&self, fd: i32, buf: &mut [u8], offset: i64) -> i64 {
        let _ = offset;
        self.read(fd, buf)
    }

    fn write(&self, fd: i32, buf: &[u8]) -> i64 {
        let _ = (fd, buf);
        QfsError::Einval.as_neg()
    }

    fn pwrite(&self, fd: i32, buf: &[u8], offset: i64) -> i64 {
        let _ = offset;
        self.write(fd, buf)
    }

    fn lseek(&self, fd: i32, offset: i64, origin: SeekOrigin) -> i64 {
        let _ = (fd, offset, origin);
        QfsError::Einval.as_neg()
    }

    /// Default: `LSeek(fd, 0, CURRENT)`.
    fn tell(&self, fd: i32) -> i64 {
        self.lseek(fd, 0, SeekOrigin::Current)
    }

    fn flush(&self, fd: i32) -> i64 {
        let _ = fd;
        QfsError::Einval.as_neg()
    }

    fn fsync(&self, fd: i32) -> i64 {
        let _ = fd;
        QfsError::Einval.as_neg()
    }

    fn truncate(&self, path: &Path, length: i64) -> i64 {
        let _ = (path, length);
        QfsError::Einval.as_neg()
    }

    fn ftruncate(&self, fd: i32, length: i64) -> i64 {
        let _ = (fd, length);
        QfsError::Einval.as_neg()
    }

    fn link(&self, target: &Path, linkpath: &Path) -> i64 {
        let _ = (target, linkpath);
        QfsError::Einval.as_neg()
    }

    fn link_symbolic(&self, target: &Path, linkpath: &Path) -> i64 {
        let _ = (target, linkpath);
        QfsError::Einval.as_neg()
    }

    fn unlink(&self, path: &Path) -> i64 {
        let _ = path;
        QfsError::Einval.as_neg()
    }

    fn mkdir(&self, path: &Path, mode: u32) -> i64 {
        let _ = (path, mode);
        QfsError::Einval.as_neg()
    }

    fn rmdir(&self, path: &Path) -> i64 {
        let _ = path;
        QfsError::Einval.as_neg()
    }

    /// Fills `out` on success (return `0`); a negative return leaves `out`
    /// untouched.
    fn stat(&self, path: &Path, out: &mut Stat) -> i64 {
        let _ = (path, out);
        QfsError::Einval.as_neg()
    }

    fn fstat(&self, fd: i32, out: &mut Stat) -> i64 {
        let _ = (fd, out);
        QfsError::Einval.as_neg()
    }

    fn chmod(&self, path: &Path, mode: u32) -> i64 {
        let _ = (path, mode);
        QfsError::Einval.as_neg()
    }

    fn fchmod(&self, fd: i32, mode: u32) -> i64 {
        let _ = (fd, mode);
        QfsError::Einval.as_neg()
    }
}

/// The adapter used by partitions without a host root: every verb reports
/// `EINVAL`, and the virtual driver alone decides the outcome.
pub struct NullHostIO;

impl HostIO for NullHostIO {}
