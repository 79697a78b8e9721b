//! Recursive file and byte totals.

use std::fs;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::path::{Path, PathBuf};

use jwalk::WalkDir;

/// Number of files and their cumulative size below a set of paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeTotals {
    /// Non-directory entries (regular files, symlinks, special files).
    pub files: usize,
    /// Sum of regular file lengths.
    pub bytes: u64,
}

impl TreeTotals {
    /// Totals for a single entry.
    pub fn single(bytes: u64) -> Self {
        Self { files: 1, bytes }
    }

    /// Whether nothing was counted.
    pub fn is_empty(&self) -> bool {
        self.files == 0
    }
}

impl Add for TreeTotals {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            files: self.files + rhs.files,
            bytes: self.bytes + rhs.bytes,
        }
    }
}

impl AddAssign for TreeTotals {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for TreeTotals {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Count files and bytes below `path`.
///
/// Regular files count with their length and symlinks count as empty files;
/// symlinks are never followed. Directories and special files (pipes,
/// sockets, devices) are not counted. A path that does not exist counts as
/// nothing.
pub fn walk_totals(path: &Path) -> TreeTotals {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(err) => {
            tracing::debug!(path = %path.display(), %err, "skipping unreadable path");
            return TreeTotals::default();
        }
    };

    if !metadata.is_dir() {
        if !is_counted(metadata.file_type()) {
            return TreeTotals::default();
        }
        return TreeTotals::single(entry_bytes(&metadata));
    }

    let walker = WalkDir::new(path)
        .skip_hidden(false)
        .follow_links(false)
        .min_depth(1);

    let mut totals = TreeTotals::default();
    for entry_result in walker {
        let entry = match entry_result {
            Ok(e) => e,
            Err(err) => {
                // Vanished or unreadable subtree, keep counting the rest
                tracing::debug!(%err, "walk error");
                continue;
            }
        };

        if !is_counted(entry.file_type()) {
            continue;
        }

        let bytes = match entry.metadata() {
            Ok(m) => entry_bytes(&m),
            Err(err) => {
                tracing::debug!(path = %entry.path().display(), %err, "metadata error");
                0
            }
        };
        totals += TreeTotals::single(bytes);
    }

    totals
}

/// Count files and bytes below every path in `paths`.
pub fn walk_totals_all(paths: &[PathBuf]) -> TreeTotals {
    paths.iter().map(|p| walk_totals(p)).sum()
}

/// Whether an entry of this type is one of the files an operation processes.
pub fn is_counted(file_type: fs::FileType) -> bool {
    file_type.is_file() || file_type.is_symlink()
}

fn entry_bytes(metadata: &fs::Metadata) -> u64 {
    if metadata.is_file() { metadata.len() } else { 0 }
}
