//! Error types for file operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the engine.
pub type OpsResult<T> = Result<T, OpsError>;

/// Errors that can occur while running a file operation.
#[derive(Debug, Error)]
pub enum OpsError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// The destination device ran out of space.
    #[error("No space left on device while writing {path}")]
    StorageFull { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Pipes, sockets and device files cannot be transferred.
    #[error("Not a regular file: {path}")]
    UnsupportedFileType { path: PathBuf },

    /// Copy or move target lies inside one of the sources.
    #[error("Cannot copy {ancestor} into itself ({destination})")]
    DestinationInsideSource {
        ancestor: PathBuf,
        destination: PathBuf,
    },

    /// Copy or move submitted without a destination.
    #[error("Operation requires a destination path")]
    MissingDestination,

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The background worker died.
    #[error("Task failed: {message}")]
    Worker { message: String },
}

impl OpsError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::StorageFull => Self::StorageFull { path },
            _ => Self::Io { path, source },
        }
    }

    /// Whether this error means the path no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
