//! Symlink: an immutable target path.

use std::path::{Path, PathBuf};

pub struct Symlink {
    target: PathBuf,
}

impl Symlink {
    pub fn new(target: PathBuf) -> Self {
        Symlink { target }
    }

    pub fn follow(&self) -> &Path {
        &self.target
    }
}
