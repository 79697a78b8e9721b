//! Directory listing.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nebula_core::{OpsError, OpsResult};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Metadata for one entry of a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name without its parent directory.
    pub name: String,
    /// Full path to the entry.
    pub path: PathBuf,
    /// Length in bytes (0 for directories).
    pub size: u64,
    pub is_directory: bool,
    pub is_symlink: bool,
    /// Where the symlink points, if this is one.
    pub symlink_target: Option<PathBuf>,
    pub is_hidden: bool,
    pub last_modified: Option<DateTime<Utc>>,
    /// Permission bits rendered as `rwxr-xr-x`.
    pub permissions: Option<String>,
}

impl FileEntry {
    /// Build an entry from a path, without following a final symlink.
    pub fn from_path(path: &Path) -> OpsResult<Self> {
        let metadata = fs::symlink_metadata(path).map_err(|e| OpsError::io(path, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let is_symlink = metadata.file_type().is_symlink();
        let symlink_target = if is_symlink {
            fs::read_link(path).ok()
        } else {
            None
        };
        // A symlink to a directory is browsed as a directory
        let is_directory = metadata.is_dir() || (is_symlink && path.is_dir());

        Ok(Self {
            is_hidden: name.starts_with('.'),
            name,
            path: path.to_path_buf(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            is_directory,
            is_symlink,
            symlink_target,
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            permissions: format_permissions(&metadata),
        })
    }

    /// Lowercased extension, empty when there is none.
    pub fn extension(&self) -> String {
        Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

/// Source of directory listings.
///
/// The engine itself only needs sizes and directory flags, which the walker
/// derives on its own; listings feed whoever presents the files.
pub trait DirectoryLister: Send + Sync {
    /// List the direct children of `path`.
    fn list(&self, path: &Path) -> OpsResult<Vec<FileEntry>>;
}

/// Lists the local filesystem.
#[derive(Debug, Clone, Copy)]
pub struct FsLister {
    /// Include entries whose name starts with a dot.
    pub show_hidden: bool,
}

impl Default for FsLister {
    fn default() -> Self {
        Self::new()
    }
}

impl FsLister {
    /// Create a lister that shows hidden entries.
    pub fn new() -> Self {
        Self { show_hidden: true }
    }

    /// Create a lister that omits hidden entries.
    pub fn without_hidden() -> Self {
        Self { show_hidden: false }
    }
}

impl DirectoryLister for FsLister {
    fn list(&self, path: &Path) -> OpsResult<Vec<FileEntry>> {
        let entries = fs::read_dir(path).map_err(|e| OpsError::io(path, e))?;

        let mut listing = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| OpsError::io(path, e))?;
            let item = match FileEntry::from_path(&entry.path()) {
                Ok(item) => item,
                Err(err) => {
                    // Raced with a delete
                    tracing::debug!(%err, "skipping entry");
                    continue;
                }
            };
            if item.is_hidden && !self.show_hidden {
                continue;
            }
            listing.push(item);
        }

        // Directories first, then by name
        listing.sort_by(|a, b| {
            b.is_directory
                .cmp(&a.is_directory)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });

        Ok(listing)
    }
}

#[cfg(unix)]
fn format_permissions(metadata: &fs::Metadata) -> Option<String> {
    let mode = metadata.permissions().mode();
    let bits = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];
    Some(
        bits.iter()
            .map(|(bit, c)| if mode & bit != 0 { *c } else { '-' })
            .collect(),
    )
}

#[cfg(not(unix))]
fn format_permissions(metadata: &fs::Metadata) -> Option<String> {
    let write = if metadata.permissions().readonly() { '-' } else { 'w' };
    Some(format!("r{write}-"))
}
