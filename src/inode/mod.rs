//! The inode model: common metadata plus a tagged variant per inode kind.
//! A single `Meta` record (fileno, type/permission bits, link count, size,
//! timestamps) is shared across regular files, directories, symlinks and
//! devices; kind-specific behavior lives in the `Kind` variant, not in an
//! inheritance hierarchy. Device behavior is injected through a small
//! capability object (`DeviceOps`) rather than a subclass.

pub mod device;
pub mod directory;
pub mod regular;
pub mod symlink;

pub use device::{Device, DeviceOps};
pub use directory::Directory;
pub use regular::RegularFile;
pub use symlink::Symlink;

use crate::types::{
    s_ischr, s_isdir, s_islnk, s_isreg, Stat, Timespec, DEFAULT_PERM, S_IFCHR, S_IFDIR, S_IFLNK,
    S_IFREG, S_IRGRP, S_IROTH, S_IRUSR, S_IWGRP, S_IWOTH, S_IWUSR, S_IXGRP, S_IXOTH, S_IXUSR,
};

/// Inode number, unique within its owning partition. `-1` marks an inode not
/// yet indexed by a partition (fresh, not-yet-linked).
pub type Fileno = i64;
pub const NO_FILENO: Fileno = -1;

/// Per-partition block id, mirrored into every inode's `dev` field.
pub type BlockId = u64;

/// Metadata common to every inode kind.
#[derive(Debug, Clone)]
pub struct Meta {
    pub ino: Fileno,
    pub dev: BlockId,
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    pub blksize: u32,
    pub blocks: u64,
    pub atim: Timespec,
    pub mtim: Timespec,
    pub ctim: Timespec,
}

impl Meta {
    pub fn new(type_bits: u32, perm: u32) -> Self {
        let now = Timespec::now();
        Meta {
            ino: NO_FILENO,
            dev: 0,
            mode: type_bits | (perm & 0o7777),
            nlink: 0,
            size: 0,
            blksize: 4096,
            blocks: 0,
            atim: now,
            mtim: now,
            ctim: now,
        }
    }

    pub fn touch_mtime(&mut self) {
        let now = Timespec::now();
        self.mtim = now;
        self.ctim = now;
    }

    pub fn to_stat(&self) -> Stat {
        Stat {
            dev: self.dev,
            ino: self.ino as u64,
            nlink: self.nlink,
            mode: self.mode,
            size: self.size,
            blksize: self.blksize,
            blocks: self.blocks,
            atim: self.atim,
            mtim: self.mtim,
            ctim: self.ctim,
        }
    }

    pub fn can_read(&self) -> bool {
        self.mode & (S_IRUSR | S_IRGRP | S_IROTH) != 0
    }

    pub fn can_write(&self) -> bool {
        self.mode & (S_IWUSR | S_IWGRP | S_IWOTH) != 0
    }

    pub fn can_execute(&self) -> bool {
        self.mode & (S_IXUSR | S_IXGRP | S_IXOTH) != 0
    }

    /// Replace the low nine bits of `mode`, preserving the type bits.
    pub fn chmod(&mut self, perm: u32) {
        self.mode = (self.mode & !0o7777) | (perm & 0o7777);
        self.ctim = Timespec::now();
    }
}

/// The variant-specific payload of an inode.
pub enum Kind {
    Regular(RegularFile),
    Directory(Directory),
    Symlink(Symlink),
    Device(Device),
}

/// A single inode: shared metadata plus its kind-specific payload.
pub struct Inode {
    pub meta: Meta,
    pub kind: Kind,
}

impl Inode {
    pub fn new_regular() -> Self {
        Inode {
            meta: Meta::new(S_IFREG, DEFAULT_PERM),
            kind: Kind::Regular(RegularFile::new()),
        }
    }

    pub fn new_directory() -> Self {
        Inode {
            meta: Meta::new(S_IFDIR, DEFAULT_PERM),
            kind: Kind::Directory(Directory::new()),
        }
    }

    pub fn new_symlink(target: std::path::PathBuf) -> Self {
        let size = target.as_os_str().len() as u64;
        let mut meta = Meta::new(S_IFLNK, DEFAULT_PERM);
        meta.size = size;
        // Symlinks are never target-counted; nlink stays fixed at 1.
        meta.nlink = 1;
        Inode {
            meta,
            kind: Kind::Symlink(Symlink::new(target)),
        }
    }

    pub fn new_device(ops: std::rc::Rc<dyn DeviceOps>) -> Self {
        Inode {
            meta: Meta::new(S_IFCHR, DEFAULT_PERM),
            kind: Kind::Device(Device::new(ops)),
        }
    }

    pub fn is_dir(&self) -> bool {
        s_isdir(self.meta.mode)
    }
    pub fn is_file(&self) -> bool {
        s_isreg(self.meta.mode)
    }
    pub fn is_link(&self) -> bool {
        s_islnk(self.meta.mode)
    }
    pub fn is_char(&self) -> bool {
        s_ischr(self.meta.mode)
    }

    pub fn as_directory(&self) -> Option<&Directory> {
        match &self.kind {
            Kind::Directory(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_directory_mut(&mut self) -> Option<&mut Directory> {
        match &mut self.kind {
            Kind::Directory(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_symlink(&self) -> Option<&Symlink> {
        match &self.kind {
            Kind::Symlink(s) => Some(s),
            _ => None,
        }
    }

    /// Live stat snapshot: directories recompute `size` on demand as
    /// `entries.len() * 32` rather than tracking it eagerly.
    pub fn stat(&self) -> Stat {
        let mut st = self.meta.to_stat();
        if let Kind::Directory(d) = &self.kind {
            st.size = d.reported_size();
        }
        st
    }
}
