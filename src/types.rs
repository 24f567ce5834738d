//! POSIX-shaped scalars: mode bits, open flags, seek origin, the stat record.
//!
//! Bit patterns are chosen to match Linux so host pass-through needs no
//! translation.

use bitflags::bitflags;

bitflags! {
    /// Open flags, stable bit positions matching Linux.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const RDONLY    = 0;
        const WRONLY    = 0o1;
        const RDWR      = 0o2;
        const CREAT     = 0o100;
        const EXCL      = 0o200;
        const NOCTTY    = 0o400;
        const TRUNC     = 0o1000;
        const APPEND    = 0o2000;
        const NONBLOCK  = 0o4000;
        const DSYNC     = 0o10000;
        const ASYNC     = 0o20000;
        const DIRECT    = 0o40000;
        const LARGEFILE = 0o100000;
        const DIRECTORY = 0o200000;
        const NOFOLLOW  = 0o400000;
        const NOATIME   = 0o1000000;
        const CLOEXEC   = 0o2000000;
        const PATH      = 0o10000000;
        const TMPFILE   = 0o20000000 | 0o200000; // DIRECTORY | extra bit
        const SYNC      = 0o4010000;
    }
}

/// Mask isolating the access-mode bits (`RDONLY`/`WRONLY`/`RDWR`) from flags.
pub const O_ACCMODE: u32 = 0o3;

impl OpenFlags {
    /// Flags this core accepts but whose semantics it deliberately ignores:
    /// they pass through unexamined.
    pub const IGNORED: OpenFlags = OpenFlags::NONBLOCK
        .union(OpenFlags::SYNC)
        .union(OpenFlags::ASYNC)
        .union(OpenFlags::CLOEXEC)
        .union(OpenFlags::DIRECT)
        .union(OpenFlags::DSYNC)
        .union(OpenFlags::LARGEFILE)
        .union(OpenFlags::NOATIME)
        .union(OpenFlags::NOCTTY);

    /// Flags this core explicitly refuses (`EINVAL`) rather than ignoring.
    pub const UNSUPPORTED: OpenFlags = OpenFlags::NOFOLLOW
        .union(OpenFlags::PATH)
        .union(OpenFlags::TMPFILE);

    pub fn access_mode(self) -> OpenFlags {
        OpenFlags::from_bits_truncate(self.bits() & O_ACCMODE)
    }

    pub fn wants_read(self) -> bool {
        let m = self.access_mode();
        m == OpenFlags::RDONLY || m == OpenFlags::RDWR
    }

    pub fn wants_write(self) -> bool {
        let m = self.access_mode();
        m == OpenFlags::WRONLY || m == OpenFlags::RDWR
    }
}

/// Mode-bit type constants. The type occupies the top bits of `mode`;
/// `S_ISXXX` macros below test `(mode & S_IFMT) == typebits`.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

pub const S_IRUSR: u32 = 0o400;
pub const S_IWUSR: u32 = 0o200;
pub const S_IXUSR: u32 = 0o100;
pub const S_IRGRP: u32 = 0o040;
pub const S_IWGRP: u32 = 0o020;
pub const S_IXGRP: u32 = 0o010;
pub const S_IROTH: u32 = 0o004;
pub const S_IWOTH: u32 = 0o002;
pub const S_IXOTH: u32 = 0o001;

/// Default permission bits for newly created inodes.
pub const DEFAULT_PERM: u32 = 0o755;

pub const fn s_isreg(mode: u32) -> bool {
    mode & S_IFMT == S_IFREG
}
pub const fn s_isdir(mode: u32) -> bool {
    mode & S_IFMT == S_IFDIR
}
pub const fn s_islnk(mode: u32) -> bool {
    mode & S_IFMT == S_IFLNK
}
pub const fn s_ischr(mode: u32) -> bool {
    mode & S_IFMT == S_IFCHR
}

/// `lseek` origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Origin,
    Current,
    End,
}

/// A single nanosecond-resolution timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub fn now() -> Self {
        let d = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Timespec {
            sec: d.as_secs() as i64,
            nsec: d.subsec_nanos() as i64,
        }
    }
}

/// The stat record returned to callers. `uid`/`gid`/`rdev` are reserved but
/// not populated: this core has no user/group identity, just one implicit
/// principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    pub dev: u64,
    pub ino: u64,
    pub nlink: u32,
    pub mode: u32,
    pub size: u64,
    pub blksize: u32,
    pub blocks: u64,
    pub atim: Timespec,
    pub mtim: Timespec,
    pub ctim: Timespec,
}

bitflags! {
    /// Mount option bit flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MountOptions: u32 {
        const NOOPT   = 0;
        const BIND    = 0x01;
        const RW      = 0x02;
        const EXEC    = 0x04;
        const REMOUNT = 0x08;
    }
}
