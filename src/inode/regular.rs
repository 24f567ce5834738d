//! RegularFile: a contiguous byte buffer, plus "mock" variants used when the
//! inode is host-mirrored (the real bytes live in the host file instead).
//! The mock methods only track `size`; they never touch `data`.

use crate::errno::{QfsError, QfsResult};

pub struct RegularFile {
    data: Vec<u8>,
}

impl RegularFile {
    pub fn new() -> Self {
        RegularFile { data: Vec::new() }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Copy `min(count, size - offset)` bytes into `buf`; 0 at or past EOF.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> u64 {
        let size = self.data.len() as u64;
        if offset >= size {
            return 0;
        }
        let avail = (size - offset) as usize;
        let n = buf.len().min(avail);
        buf[..n].copy_from_slice(&self.data[offset as usize..offset as usize + n]);
        n as u64
    }

    /// Extend to `max(size, offset+count)`, zero-filling any gap, then copy
    /// `data` into `[offset, offset+count)`.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> u64 {
        let end = offset + data.len() as u64;
        if end > self.data.len() as u64 {
            self.data.resize(end as usize, 0);
        }
        self.data[offset as usize..end as usize].copy_from_slice(data);
        data.len() as u64
    }

    pub fn truncate(&mut self, length: u64) -> QfsResult<()> {
        self.data.resize(length as usize, 0);
        Ok(())
    }

    /// Host-mirrored read: returns the byte count the host would have
    /// returned, without touching the (unused) in-memory buffer.
    pub fn mock_read(size: u64, offset: u64, count: u64) -> u64 {
        if offset >= size {
            0
        } else {
            count.min(size - offset)
        }
    }

    /// Host-mirrored write: only grows the tracked size.
    pub fn mock_write(size: u64, offset: u64, count: u64) -> u64 {
        let _ = size;
        let _ = offset;
        count
    }

    pub fn mock_truncate(length: i64) -> QfsResult<()> {
        if length < 0 {
            return Err(QfsError::Einval);
        }
        Ok(())
    }
}

impl Default for RegularFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let mut f = RegularFile::new();
        assert_eq!(f.write(0, b"hello"), 5);
        let mut buf = [0u8; 5];
        assert_eq!(f.read(0, &mut buf), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn write_extends_and_zero_fills_gap() {
        let mut f = RegularFile::new();
        f.write(0, b"ab");
        f.write(5, b"cd");
        assert_eq!(f.len(), 7);
        let mut buf = [0u8; 7];
        f.read(0, &mut buf);
        assert_eq!(&buf, b"ab\0\0\0cd");
    }

    #[test]
    fn read_past_eof_is_zero() {
        let f = RegularFile::new();
        let mut buf = [1u8; 4];
        assert_eq!(f.read(10, &mut buf), 0);
    }

    #[test]
    fn truncate_shrinks_and_zero_pads() {
        let mut f = RegularFile::new();
        f.write(0, b"hello world");
        f.truncate(2).unwrap();
        assert_eq!(f.len(), 2);
        let mut buf = [9u8; 2];
        assert_eq!(f.read(0, &mut buf), 2);
        assert_eq!(&buf, b"he");
    }
}
