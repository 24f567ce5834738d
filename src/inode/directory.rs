//! Directory: an ordered `name -> fileno` mapping plus an optional mount slot.
//!
//! Entries store `Fileno` *indices* into the owning partition's inode table
//! rather than strong references to other inodes. This sidesteps the
//! `.`/`..` reference cycle outright: nothing here is reference-counted, so
//! there is nothing to leak.
//!
//! nlink accounting is deliberately *not* done here: bumping a link count
//! requires inspecting the target inode's kind (symlinks are never bumped),
//! which only the owning [`crate::partition::Partition`] can see. `Directory`
//! stays a dumb ordered map; `Partition` is where those invariants are
//! enforced.

use std::collections::BTreeMap;

use crate::errno::{QfsError, QfsResult};
use crate::inode::{BlockId, Fileno};

/// A directory's contents: an ordered mapping of name to inode number.
pub struct Directory {
    entries: BTreeMap<String, Fileno>,
    /// Non-empty while another partition's root is mounted here; while set,
    /// the local `entries` are hidden from lookup.
    pub mounted_root: Option<BlockId>,
}

impl Directory {
    pub fn new() -> Self {
        Directory {
            entries: BTreeMap::new(),
            mounted_root: None,
        }
    }

    /// Find the fileno of a local entry. Returns `None` while `mounted_root`
    /// is set, since this partition's own entries are shadowed by the mount.
    pub fn lookup(&self, name: &str) -> Option<Fileno> {
        if self.mounted_root.is_some() {
            return None;
        }
        self.entries.get(name).copied()
    }

    /// Insert a new entry. Does not touch the target's nlink; the caller
    /// (`Partition`) does that after checking the target's kind.
    pub fn insert(&mut self, name: impl Into<String>, fileno: Fileno) -> QfsResult<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(QfsError::Einval);
        }
        if self.entries.contains_key(&name) {
            return Err(QfsError::Eexist);
        }
        self.entries.insert(name, fileno);
        Ok(())
    }

    /// Remove an entry, returning the fileno it pointed at.
    pub fn remove(&mut self, name: &str) -> QfsResult<Fileno> {
        self.entries.remove(name).ok_or(QfsError::Enoent)
    }

    /// True once only `.` and `..` remain.
    pub fn is_empty_of_real_entries(&self) -> bool {
        self.entries.keys().all(|k| k == "." || k == "..")
    }

    /// Iterate all entries in name order, including `.` and `..`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Fileno)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `entries.len() * 32`, reported on demand as a directory's `size`.
    pub fn reported_size(&self) -> u64 {
        self.entries.len() as u64 * 32
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let mut d = Directory::new();
        assert_eq!(d.lookup("a"), None);
        d.insert("a", 5).unwrap();
        assert_eq!(d.lookup("a"), Some(5));
        assert_eq!(d.insert("a", 6), Err(QfsError::Eexist));
        assert_eq!(d.insert("", 6), Err(QfsError::Einval));
    }

    #[test]
    fn mounted_root_hides_entries() {
        let mut d = Directory::new();
        d.insert("a", 5).unwrap();
        d.mounted_root = Some(7);
        assert_eq!(d.lookup("a"), None);
    }

    #[test]
    fn empty_of_real_entries() {
        let mut d = Directory::new();
        d.insert(".", 1).unwrap();
        d.insert("..", 1).unwrap();
        assert!(d.is_empty_of_real_entries());
        d.insert("x", 2).unwrap();
        assert!(!d.is_empty_of_real_entries());
    }
}
