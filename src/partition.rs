//! Partition: an inode arena plus a partition-local path resolver.
//!
//! `inodes` is the sole owner of every inode in this partition; directories
//! reference each other only by [`Fileno`], so `.` and `..` never form a
//! reference cycle.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::errno::{QfsError, QfsResult};
use crate::inode::{BlockId, Fileno, Inode, NO_FILENO};

/// Per-call resolution state, discarded after the call.
#[derive(Debug, Clone, Default)]
pub struct Resolved {
    pub parent: Option<Fileno>,
    pub node: Option<Fileno>,
    pub leaf: String,
}

/// What the partition-local resolver hit. `Done` is a normal finish
/// (success or the parent-intact-ENOENT case folded into the `Err` return);
/// the other two variants ask the cross-partition resolver (`qfs.rs`) to
/// keep going elsewhere.
#[derive(Debug)]
pub enum ResolveStep {
    Done,
    /// The new node is a directory carrying a mount; `remainder` has a
    /// leading slash, ready to resolve against the mounted partition's root.
    MountDescent { block_id: BlockId, remainder: PathBuf },
    /// The new node is a symlink; `remainder` has no leading slash, ready to
    /// be appended after the symlink target.
    Symlink { target: Fileno, remainder: PathBuf },
}

pub struct Partition {
    pub block_id: BlockId,
    pub host_root: Option<PathBuf>,
    inodes: HashMap<Fileno, Inode>,
    next_fileno: Fileno,
    pub root: Fileno,
}

impl Partition {
    /// A pure in-memory partition.
    pub fn new(block_id: BlockId, root_permissions: u32) -> Self {
        Self::build(block_id, None, root_permissions)
    }

    /// A partition mirrored onto a host directory.
    pub fn new_host_bound(block_id: BlockId, host_root: PathBuf, root_permissions: u32) -> Self {
        Self::build(block_id, Some(lexically_normalize(&host_root)), root_permissions)
    }

    fn build(block_id: BlockId, host_root: Option<PathBuf>, root_permissions: u32) -> Self {
        let mut p = Partition {
            block_id,
            host_root,
            inodes: HashMap::new(),
            next_fileno: 2, // 1 is reserved
            root: NO_FILENO,
        };
        let mut root_inode = Inode::new_directory();
        root_inode.meta.chmod(root_permissions);
        let root = p.index_inode(root_inode);
        p.root = root;
        p.mkrelative(root, root);
        p
    }

    fn inode(&self, fileno: Fileno) -> QfsResult<&Inode> {
        self.inodes.get(&fileno).ok_or(QfsError::Enoent)
    }

    fn inode_mut(&mut self, fileno: Fileno) -> QfsResult<&mut Inode> {
        self.inodes.get_mut(&fileno).ok_or(QfsError::Enoent)
    }

    pub fn get(&self, fileno: Fileno) -> Option<&Inode> {
        self.inodes.get(&fileno)
    }

    pub fn get_mut(&mut self, fileno: Fileno) -> Option<&mut Inode> {
        self.inodes.get_mut(&fileno)
    }

    fn alloc_fileno(&mut self) -> Fileno {
        let f = self.next_fileno;
        self.next_fileno += 1;
        f
    }

    /// Assigns a fileno (if unset) and stamps `ino`/`dev`. A directory's
    /// entries are filenos into this same arena, so a pre-built subtree
    /// (e.g. `touch_with` handed an already-populated directory) only needs
    /// its own children indexed first by the caller — matches
    /// `Partition::IndexInode` recursing into a ready-made child's entries.
    pub fn index_inode(&mut self, mut node: Inode) -> Fileno {
        let fileno = if node.meta.ino == NO_FILENO {
            self.alloc_fileno()
        } else {
            node.meta.ino
        };
        node.meta.ino = fileno;
        node.meta.dev = self.block_id;
        self.inodes.insert(fileno, node);
        fileno
    }

    /// Partition-local resolver. `path` must be absolute.
    pub fn resolve(&self, path: &str, r: &mut Resolved) -> QfsResult<ResolveStep> {
        if path.is_empty() {
            return Err(QfsError::Einval);
        }
        if !path.starts_with('/') {
            return Err(QfsError::Ebadf);
        }

        r.parent = Some(self.root);
        r.node = Some(self.root);
        r.leaf = String::new();

        let mut current = self.root;
        let parts: Vec<&str> = path.split('/').collect();
        let last = parts.len() - 1;

        for (i, part) in parts.iter().enumerate() {
            if i == 0 {
                // the empty component produced by the leading '/'.
                continue;
            }
            let is_final = i == last;

            if part.is_empty() {
                // trailing slash: legal only here, and only on a dir/symlink.
                let node = self.inode(current)?;
                if !(node.is_dir() || node.is_link()) {
                    return Err(QfsError::Enotdir);
                }
                continue;
            }

            let node = self.inode(current)?;
            if !(node.is_dir() || node.is_link()) && !is_final {
                return Err(QfsError::Enotdir);
            }

            if node.is_dir() {
                if !node.meta.can_read() {
                    return Err(QfsError::Eacces);
                }
                let dir = node.as_directory().expect("checked is_dir");
                let found = dir.lookup(part);

                r.parent = Some(current);
                r.node = found;
                r.leaf = (*part).to_string();

                match found {
                    None => {
                        if !is_final {
                            r.parent = None;
                            r.node = None;
                        }
                        return Err(QfsError::Enoent);
                    }
                    Some(next) => {
                        current = next;
                        let child = self.inode(current)?;
                        if let Some(dir) = child.as_directory() {
                            if let Some(block_id) = dir.mounted_root {
                                let remainder = format!("/{}", parts[i + 1..].join("/"));
                                return Ok(ResolveStep::MountDescent {
                                    block_id,
                                    remainder: PathBuf::from(remainder),
                                });
                            }
                        }
                        if child.is_link() {
                            let remainder = parts[i + 1..].join("/");
                            return Ok(ResolveStep::Symlink {
                                target: current,
                                remainder: PathBuf::from(remainder),
                            });
                        }
                    }
                }
            }
            // current is not a directory and this is the final component:
            // matches the original's fall-through — r stays at its previous
            // value, the trailing component is silently not descended into.
        }

        Ok(ResolveStep::Done)
    }

    /// Creates a regular file and links it under `name` in `parent`.
    pub fn touch(&mut self, parent: Fileno, name: &str) -> QfsResult<Fileno> {
        self.touch_with(parent, name, Inode::new_regular())
    }

    pub fn touch_with(&mut self, parent: Fileno, name: &str, child: Inode) -> QfsResult<Fileno> {
        let fileno = self.link_new(parent, name, child)?;
        Ok(fileno)
    }

    /// Links a brand-new (not-yet-indexed) inode under `name` in `parent`,
    /// then indexes it.
    fn link_new(&mut self, parent: Fileno, name: &str, child: Inode) -> QfsResult<Fileno> {
        if parent == NO_FILENO || name.is_empty() {
            return Err(QfsError::Einval);
        }
        {
            let p = self.inode(parent)?;
            let dir = p.as_directory().ok_or(QfsError::Enotdir)?;
            if dir.lookup(name).is_some() {
                return Err(QfsError::Eexist);
            }
        }
        let bump_nlink = !child.is_link();
        let fileno = self.index_inode(child);
        let p = self.inode_mut(parent)?;
        let dir = p.as_directory_mut().expect("checked above");
        dir.insert(name, fileno)?;
        if bump_nlink {
            if let Some(inode) = self.inodes.get_mut(&fileno) {
                inode.meta.nlink += 1;
            }
        }
        Ok(fileno)
    }

    /// Creates a directory under `parent`, installs `.`/`..`, and bumps
    /// nlink on both sides. Directories are linked without the
    /// directory-refusal check `link` applies, so `mkdir` goes through its
    /// own low-level insert rather than [`Partition::link`].
    pub fn mkdir(&mut self, parent: Fileno, name: &str) -> QfsResult<Fileno> {
        if name.is_empty() {
            return Err(QfsError::Einval);
        }
        {
            let p = self.inode(parent)?;
            let dir = p.as_directory().ok_or(QfsError::Enoent)?;
            if dir.lookup(name).is_some() {
                return Err(QfsError::Eexist);
            }
        }
        let child_inode = Inode::new_directory();
        let child = self.index_inode(child_inode);

        let p = self.inode_mut(parent)?;
        let dir = p.as_directory_mut().expect("checked above");
        dir.insert(name, child)?;
        if let Some(inode) = self.inodes.get_mut(&child) {
            inode.meta.nlink += 1; // linked into parent
        }

        // `..`'s target would be the mounted-from partition's root if `parent`
        // carries a mount, but that crosses partitions and is resolved by the
        // caller (`qfs.rs`); within one partition `parent` is always correct.
        self.mkrelative(parent, child);
        Ok(child)
    }

    /// Installs `.` -> child and `..` -> parent, bumping nlink on both sides.
    /// A directory's nlink ends up at `2 + subdirectory count`.
    fn mkrelative(&mut self, parent: Fileno, child: Fileno) {
        if let Some(inode) = self.inodes.get_mut(&child) {
            if let Some(dir) = inode.as_directory_mut() {
                let _ = dir.insert(".", child);
            }
            inode.meta.nlink += 1;
        }
        if let Some(inode) = self.inodes.get_mut(&child) {
            if let Some(dir) = inode.as_directory_mut() {
                let _ = dir.insert("..", parent);
            }
        }
        if let Some(inode) = self.inodes.get_mut(&parent) {
            inode.meta.nlink += 1;
        }
    }

    /// Hardlinks an existing inode under a new name. Refuses directories
    /// (`EPERM`) — the policy check `mkdir` bypasses by going through its
    /// own insert path instead of this one.
    pub fn link(&mut self, source: Fileno, dest_parent: Fileno, name: &str) -> QfsResult<()> {
        if name.is_empty() {
            return Err(QfsError::Einval);
        }
        if self.inode(source).is_err() {
            return Err(QfsError::Enoent);
        }
        if self.inode(source)?.is_dir() {
            return Err(QfsError::Eperm);
        }
        {
            let p = self.inode(dest_parent)?;
            let dir = p.as_directory().ok_or(QfsError::Enotdir)?;
            if dir.lookup(name).is_some() {
                return Err(QfsError::Eexist);
            }
        }
        let bump_nlink = !self.inode(source)?.is_link();
        let p = self.inode_mut(dest_parent)?;
        let dir = p.as_directory_mut().ok_or(QfsError::Enotdir)?;
        dir.insert(name, source)?;
        if bump_nlink {
            if let Some(inode) = self.inodes.get_mut(&source) {
                inode.meta.nlink += 1;
            }
        }
        Ok(())
    }

    /// Removes one hardlink. Refuses directory targets (`EISDIR`); that is
    /// `rmdir`'s job. `referenced` is true when some open handle still
    /// points at the target (the caller, `Qfs`, is the only layer that can
    /// know this); the inode table entry is then kept alive even at
    /// `nlink == 0` until the last referencing handle closes and calls
    /// `rm_inode` again.
    pub fn unlink(&mut self, parent: Fileno, name: &str, referenced: bool) -> QfsResult<()> {
        if name.is_empty() {
            return Err(QfsError::Einval);
        }
        let target = {
            let p = self.inode(parent)?;
            let dir = p.as_directory().ok_or(QfsError::Enotdir)?;
            dir.lookup(name).ok_or(QfsError::Enoent)?
        };
        if self.inode(target)?.is_dir() {
            return Err(QfsError::Eisdir);
        }

        let p = self.inode_mut(parent)?;
        let dir = p.as_directory_mut().expect("checked above");
        dir.remove(name)?;

        if let Some(inode) = self.inodes.get_mut(&target) {
            inode.meta.nlink = inode.meta.nlink.saturating_sub(1);
        }
        if referenced {
            return Ok(());
        }
        self.rm_inode(target)
    }

    /// Removes an empty directory. The target's `mounted_root` must be
    /// empty; unmounting a live mountpoint is `EBUSY` and is enforced by
    /// the caller (`qfs.rs`), which knows about the mount registry this
    /// partition does not.
    pub fn rmdir(&mut self, parent: Fileno, name: &str) -> QfsResult<()> {
        if name.is_empty() {
            return Err(QfsError::Einval);
        }
        let target = {
            let p = self.inode(parent)?;
            let dir = p.as_directory().ok_or(QfsError::Enotdir)?;
            dir.lookup(name).ok_or(QfsError::Enoent)?
        };
        {
            let node = self.inode(target)?;
            let dir = node.as_directory().ok_or(QfsError::Enotdir)?;
            if !dir.is_empty_of_real_entries() {
                return Err(QfsError::Enotempty);
            }
        }

        let p = self.inode_mut(parent)?;
        let dir = p.as_directory_mut().expect("checked above");
        dir.remove(name)?;
        if let Some(inode) = self.inodes.get_mut(&parent) {
            inode.meta.nlink = inode.meta.nlink.saturating_sub(1); // target's ".." entry is gone
        }
        self.inodes.remove(&target);
        Ok(())
    }

    /// Replaces the permission bits, preserving type bits.
    pub fn chmod(&mut self, target: Fileno, perm: u32) -> QfsResult<()> {
        self.inode_mut(target)?.meta.chmod(perm);
        Ok(())
    }

    /// Erases the inode from the table once `nlink == 0`; a no-op at
    /// `nlink > 0`. Open-handle liveness is the caller's concern (`Qfs`, via
    /// its handle table) — this is also why `Qfs::close` calls back into
    /// this after dropping the last handle to an already-unlinked inode.
    pub fn rm_inode(&mut self, target: Fileno) -> QfsResult<()> {
        let nlink = match self.inodes.get(&target) {
            Some(inode) => inode.meta.nlink,
            None => return Ok(()),
        };
        if nlink > 0 {
            return Ok(());
        }
        self.inodes.remove(&target);
        Ok(())
    }

    /// Translates a partition-local path to a host path. `ENODEV` if this
    /// partition has no host root; `EACCES` if the normalized result
    /// escapes `host_root` (a ".." escape attempt).
    pub fn host_path(&self, local_path: &str) -> QfsResult<PathBuf> {
        let root = self.host_root.as_ref().ok_or(QfsError::Enodev)?;
        let trimmed = local_path.strip_prefix('/').unwrap_or(local_path);
        let candidate = lexically_normalize(&root.join(trimmed));
        if !candidate.starts_with(root) {
            return Err(QfsError::Eacces);
        }
        Ok(candidate)
    }
}

/// A pure lexical `..`/`.` collapse, performed without touching the host
/// filesystem; normalization itself cannot fail.
fn lexically_normalize(path: &std::path::Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_PERM;

    fn fresh() -> Partition {
        Partition::new(1, DEFAULT_PERM)
    }

    #[test]
    fn root_resolves_to_itself() {
        let p = fresh();
        let mut r = Resolved::default();
        let step = p.resolve("/", &mut r).unwrap();
        assert!(matches!(step, ResolveStep::Done));
        assert_eq!(r.node, Some(p.root));
        assert_eq!(r.parent, Some(p.root));
    }

    #[test]
    fn root_nlink_is_two_after_construction() {
        let p = fresh();
        assert_eq!(p.get(p.root).unwrap().meta.nlink, 2);
    }

    #[test]
    fn touch_creates_and_resolves() {
        let mut p = fresh();
        let root = p.root;
        let f = p.touch(root, "hello.txt").unwrap();
        let mut r = Resolved::default();
        p.resolve("/hello.txt", &mut r).unwrap();
        assert_eq!(r.node, Some(f));
        assert_eq!(p.get(f).unwrap().meta.nlink, 1);
    }

    #[test]
    fn touch_duplicate_name_is_eexist() {
        let mut p = fresh();
        let root = p.root;
        p.touch(root, "a").unwrap();
        assert_eq!(p.touch(root, "a"), Err(QfsError::Eexist));
    }

    #[test]
    fn mkdir_bumps_nlink_on_both_sides() {
        let mut p = fresh();
        let root = p.root;
        let child = p.mkdir(root, "sub").unwrap();
        assert_eq!(p.get(child).unwrap().meta.nlink, 2);
        assert_eq!(p.get(root).unwrap().meta.nlink, 3); // 2 initial + 1 subdir
    }

    #[test]
    fn rmdir_requires_empty() {
        let mut p = fresh();
        let root = p.root;
        let child = p.mkdir(root, "sub").unwrap();
        p.touch(child, "f").unwrap();
        assert_eq!(p.rmdir(root, "sub"), Err(QfsError::Enotempty));
        p.unlink(child, "f", false).unwrap();
        p.rmdir(root, "sub").unwrap();
        let mut r = Resolved::default();
        assert_eq!(p.resolve("/sub", &mut r), Err(QfsError::Enoent));
    }

    #[test]
    fn link_refuses_directories() {
        let mut p = fresh();
        let root = p.root;
        let dir = p.mkdir(root, "d").unwrap();
        assert_eq!(p.link(dir, root, "alias"), Err(QfsError::Eperm));
    }

    #[test]
    fn link_then_unlink_tracks_nlink() {
        let mut p = fresh();
        let root = p.root;
        let f = p.touch(root, "a").unwrap();
        p.link(f, root, "b").unwrap();
        assert_eq!(p.get(f).unwrap().meta.nlink, 2);
        p.unlink(root, "a", false).unwrap();
        assert_eq!(p.get(f).unwrap().meta.nlink, 1);
        p.unlink(root, "b", false).unwrap();
        assert!(p.get(f).is_none());
    }

    #[test]
    fn resolve_missing_midpath_clears_parent() {
        let p = fresh();
        let mut r = Resolved::default();
        assert_eq!(p.resolve("/nope/inner", &mut r), Err(QfsError::Enoent));
        assert_eq!(r.parent, None);
        assert_eq!(r.node, None);
    }

    #[test]
    fn resolve_missing_leaf_keeps_parent() {
        let p = fresh();
        let root = p.root;
        let mut r = Resolved::default();
        assert_eq!(p.resolve("/nope", &mut r), Err(QfsError::Enoent));
        assert_eq!(r.parent, Some(root));
        assert_eq!(r.node, None);
    }

    #[test]
    fn host_path_rejects_escape() {
        let p = Partition::new_host_bound(2, PathBuf::from("/tmp/root"), DEFAULT_PERM);
        assert_eq!(p.host_path("/../../etc/passwd"), Err(QfsError::Eacces));
        assert!(p.host_path("/a/b").unwrap().starts_with("/tmp/root"));
    }

    #[test]
    fn host_path_without_root_is_enodev() {
        let p = fresh();
        assert_eq!(p.host_path("/a"), Err(QfsError::Enodev));
    }
}
