//! The virtual driver: per-operation executors over an already-resolved
//! inode, run after the host adapter. The virtual result is always
//! authoritative, whether or not a host adapter also ran.
//!
//! Each function takes the resolved inode as an ordinary `&mut Inode`
//! argument rather than reading it off of some ambient call context.

use crate::inode::{Inode, Kind};
use crate::errno::{QfsError, QfsResult};
use crate::types::{SeekOrigin, Stat};

/// Read at `offset` into `buf`. Directories and symlinks cannot be read as
/// byte streams.
pub fn read(inode: &mut Inode, offset: u64, buf: &mut [u8]) -> QfsResult<u64> {
    let n = match &inode.kind {
        Kind::Regular(f) => f.read(offset, buf),
        Kind::Device(d) => d.read(buf)?,
        Kind::Directory(_) => return Err(QfsError::Eisdir),
        Kind::Symlink(_) => return Err(QfsError::Einval),
    };
    inode.meta.atim = crate::types::Timespec::now();
    Ok(n)
}

/// Write `data` at `offset`: extends the buffer, zero-fills any gap, and
/// re-syncs `meta.size` to the new buffer length.
pub fn write(inode: &mut Inode, offset: u64, data: &[u8]) -> QfsResult<u64> {
    let n = match &mut inode.kind {
        Kind::Regular(f) => {
            let n = f.write(offset, data);
            inode.meta.size = f.len();
            n
        }
        Kind::Device(d) => d.write(data)?,
        Kind::Directory(_) => return Err(QfsError::Eisdir),
        Kind::Symlink(_) => return Err(QfsError::Einval),
    };
    inode.meta.touch_mtime();
    Ok(n)
}

/// Host-mirrored read: only ever consults tracked size.
pub fn mock_read(inode: &Inode, offset: u64, count: u64) -> QfsResult<u64> {
    match &inode.kind {
        Kind::Regular(_) => Ok(crate::inode::RegularFile::mock_read(inode.meta.size, offset, count)),
        Kind::Directory(_) => Err(QfsError::Eisdir),
        _ => Err(QfsError::Einval),
    }
}

pub fn mock_write(inode: &mut Inode, offset: u64, count: u64) -> QfsResult<u64> {
    match &inode.kind {
        Kind::Regular(_) => {
            let n = crate::inode::RegularFile::mock_write(inode.meta.size, offset, count);
            let end = offset + count;
            if end > inode.meta.size {
                inode.meta.size = end;
            }
            inode.meta.touch_mtime();
            Ok(n)
        }
        Kind::Directory(_) => Err(QfsError::Eisdir),
        _ => Err(QfsError::Einval),
    }
}

/// Resize a regular file's buffer. Negative lengths are rejected by the
/// caller before the `u64` ever reaches here.
pub fn truncate(inode: &mut Inode, length: u64) -> QfsResult<()> {
    match &mut inode.kind {
        Kind::Regular(f) => {
            f.truncate(length)?;
            inode.meta.size = length;
            inode.meta.touch_mtime();
            Ok(())
        }
        Kind::Directory(_) => Err(QfsError::Eisdir),
        Kind::Device(d) => d.truncate(),
        Kind::Symlink(_) => Err(QfsError::Einval),
    }
}

pub fn mock_truncate(inode: &mut Inode, length: i64) -> QfsResult<()> {
    crate::inode::RegularFile::mock_truncate(length)?;
    inode.meta.size = length as u64;
    inode.meta.touch_mtime();
    Ok(())
}

/// New cursor position for `lseek`: `base + offset`, where `base` depends
/// on `origin` and the file's current size. A negative result is rejected
/// and the cursor is left untouched by the caller.
pub fn seek_target(current_pos: u64, size: u64, offset: i64, origin: SeekOrigin) -> QfsResult<u64> {
    let base: i64 = match origin {
        SeekOrigin::Origin => 0,
        SeekOrigin::Current => current_pos as i64,
        SeekOrigin::End => size as i64,
    };
    let target = base
        .checked_add(offset)
        .ok_or(QfsError::Einval)?;
    if target < 0 {
        return Err(QfsError::Einval);
    }
    Ok(target as u64)
}

/// Snapshot an inode's metadata into the caller's `Stat`.
pub fn stat(inode: &Inode) -> Stat {
    inode.stat()
}

/// Update permission bits, preserving type bits.
pub fn chmod(inode: &mut Inode, perm: u32) {
    inode.meta.chmod(perm);
}
