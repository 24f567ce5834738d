//! QuasiFS: an in-process, POSIX-shaped virtual filesystem.
//!
//! A [`Qfs`](qfs::Qfs) owns one or more [`Partition`](partition::Partition)s
//! arranged into a mount graph; every public operation resolves a path,
//! enforces mount and permission policy, optionally calls through to a host
//! adapter, then runs the in-memory (or host-mirrored) driver that is always
//! the source of truth. See `DESIGN.md` for the module layout rationale.

pub mod driver;
pub mod errno;
pub mod handle;
pub mod host;
pub mod inode;
pub mod partition;
pub mod qfs;
pub mod types;

pub use crate::errno::{QfsError, QfsResult};
pub use crate::qfs::Qfs;
pub use crate::types::{MountOptions, OpenFlags, SeekOrigin, Stat};
