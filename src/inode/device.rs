//! Device: an inode whose read/write is delegated to a user-supplied
//! capability object; seek and truncate are disallowed. Concrete device
//! implementations (stdout, stdin, random, zero, null) are not part of this
//! core; only the capability interface they plug into lives here.

use std::rc::Rc;

use crate::errno::{QfsError, QfsResult};

/// The capability a character device implementation provides. Out-of-scope
/// device bodies (stdout, /dev/null, ...) implement this trait externally.
pub trait DeviceOps {
    fn read(&self, buf: &mut [u8]) -> QfsResult<u64>;
    fn write(&self, buf: &[u8]) -> QfsResult<u64>;
}

pub struct Device {
    ops: Rc<dyn DeviceOps>,
}

impl Device {
    pub fn new(ops: Rc<dyn DeviceOps>) -> Self {
        Device { ops }
    }

    pub fn read(&self, buf: &mut [u8]) -> QfsResult<u64> {
        self.ops.read(buf)
    }

    pub fn write(&self, buf: &[u8]) -> QfsResult<u64> {
        self.ops.write(buf)
    }

    /// Devices are not seekable.
    pub fn lseek(&self) -> QfsResult<i64> {
        Err(QfsError::Espipe)
    }

    pub fn truncate(&self) -> QfsResult<()> {
        Err(QfsError::Einval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;
    impl DeviceOps for Echo {
        fn read(&self, buf: &mut [u8]) -> QfsResult<u64> {
            buf.fill(b'x');
            Ok(buf.len() as u64)
        }
        fn write(&self, buf: &[u8]) -> QfsResult<u64> {
            Ok(buf.len() as u64)
        }
    }

    #[test]
    fn device_disallows_seek_and_truncate() {
        let d = Device::new(Rc::new(Echo));
        assert_eq!(d.lseek(), Err(QfsError::Espipe));
        assert_eq!(d.truncate(), Err(QfsError::Einval));
        let mut buf = [0u8; 4];
        assert_eq!(d.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"xxxx");
    }
}
