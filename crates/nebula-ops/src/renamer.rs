//! Rename seam for the move fast path.

use std::fmt;
use std::io;
use std::path::Path;

/// Performs the atomic rename a move tries before falling back to copying.
pub trait Renamer: Send + Sync + fmt::Debug {
    /// Rename `from` to `to`. Fails when the two are on different filesystems.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// Renames through the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsRenamer;

impl Renamer for FsRenamer {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }
}
