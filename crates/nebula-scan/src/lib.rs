//! File tree sizing and directory listing for nebula.
//!
//! The walker computes the denominators an operation reports progress
//! against: how many files a set of paths holds and how many bytes they
//! weigh. It uses jwalk for traversal and is best-effort: entries that
//! disappear or cannot be read simply do not count.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use nebula_scan::walk_totals_all;
//!
//! let totals = walk_totals_all(&[PathBuf::from("/path/to/dir")]);
//! println!("{} files, {} bytes", totals.files, totals.bytes);
//! ```

mod listing;
mod walker;

pub use listing::{DirectoryLister, FileEntry, FsLister};
pub use walker::{is_counted, walk_totals, walk_totals_all, TreeTotals};
