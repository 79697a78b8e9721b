//! Copy, move and delete algorithms.
//!
//! An [`Executor`] owns one job from its first snapshot to its terminal one.
//! It runs on a blocking worker and checks for cancellation before every
//! top-level source and before every file.

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use nebula_core::{OperationKind, OpsError};
use nebula_scan::{is_counted, walk_totals_all};

use crate::channel::Publisher;
use crate::renamer::Renamer;
use crate::transfer::{transfer_file, TransferOptions};

/// Why a job stopped early.
#[derive(Debug)]
enum Halt {
    Cancelled,
    Failed(OpsError),
}

impl From<OpsError> for Halt {
    fn from(err: OpsError) -> Self {
        Self::Failed(err)
    }
}

/// How a job that ran to the end got there.
enum Outcome {
    /// Every file went through the transfer or delete loop.
    Processed,
    /// A move was satisfied by renames alone.
    Renamed,
}

pub(crate) struct Executor {
    publisher: Publisher,
    token: CancellationToken,
    options: TransferOptions,
    renamer: Arc<dyn Renamer>,
    sources: Arc<[PathBuf]>,
}

impl Executor {
    pub(crate) fn new(
        publisher: Publisher,
        token: CancellationToken,
        options: TransferOptions,
        renamer: Arc<dyn Renamer>,
    ) -> Self {
        let sources = Arc::clone(&publisher.current().source_paths);
        Self {
            publisher,
            token,
            options,
            renamer,
            sources,
        }
    }

    /// Run the job to its terminal snapshot.
    pub(crate) fn run(mut self) {
        let op = self.publisher.current().clone();
        tracing::info!(
            id = %op.id,
            kind = %op.kind,
            sources = op.source_paths.len(),
            "starting operation"
        );

        let totals = walk_totals_all(&self.sources);
        let result = self
            .publish(op.with_totals(totals.files, totals.bytes))
            .and_then(|()| match op.kind {
                OperationKind::Copy => self.copy(op.destination_path.as_deref()),
                OperationKind::Move => self.move_to(op.destination_path.as_deref()),
                OperationKind::Delete => self.delete(),
            });

        let now = Utc::now();
        let current = self.publisher.current();
        let terminal = match result {
            // Cancellation seen after the last checkpoint still wins
            Ok(_) if self.token.is_cancelled() => current.to_cancelled(now),
            Ok(Outcome::Processed) => current.to_completed(now),
            Ok(Outcome::Renamed) => current.to_renamed(now),
            Err(Halt::Cancelled) => current.to_cancelled(now),
            Err(Halt::Failed(err)) => {
                tracing::warn!(id = %op.id, %err, "operation failed");
                current.to_failed(err.to_string(), now)
            }
        };

        let finished = self.publisher.publish(terminal);
        tracing::info!(id = %finished.id, status = %finished.status, "{}", finished.summary());
    }

    /// Publish a snapshot, stopping the job if it came out terminal.
    fn publish(&mut self, next: nebula_core::Operation) -> Result<(), Halt> {
        if self.publisher.publish(next).is_terminal() {
            return Err(Halt::Cancelled);
        }
        Ok(())
    }

    fn checkpoint(&self) -> Result<(), Halt> {
        if self.token.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        Ok(())
    }

    fn copy(&mut self, destination: Option<&Path>) -> Result<Outcome, Halt> {
        let destination = self.validate_destination(destination)?;
        self.copy_sources(&destination)?;
        Ok(Outcome::Processed)
    }

    /// Rename everything into place, or copy then delete the originals.
    fn move_to(&mut self, destination: Option<&Path>) -> Result<Outcome, Halt> {
        let destination = self.validate_destination(destination)?;
        fs::create_dir_all(&destination).map_err(|e| OpsError::io(&destination, e))?;

        self.checkpoint()?;
        if self.rename_all(&destination)? {
            return Ok(Outcome::Renamed);
        }

        tracing::debug!(destination = %destination.display(), "rename failed, copying instead");
        self.copy_sources(&destination)?;

        // Sources go only after a full, uncancelled copy
        self.checkpoint()?;
        for source in self.sources.iter() {
            remove_tree(source)?;
        }
        Ok(Outcome::Processed)
    }

    fn delete(&mut self) -> Result<Outcome, Halt> {
        let sources = Arc::clone(&self.sources);
        for source in sources.iter() {
            self.checkpoint()?;
            self.delete_tree(source)?;
        }
        Ok(Outcome::Processed)
    }

    /// Require a destination that does not sit inside any source.
    fn validate_destination(&self, destination: Option<&Path>) -> Result<PathBuf, OpsError> {
        let destination = destination.ok_or(OpsError::MissingDestination)?;
        for source in self.sources.iter() {
            let target = target_for(source, destination);
            if target.starts_with(source) {
                return Err(OpsError::DestinationInsideSource {
                    ancestor: source.clone(),
                    destination: destination.to_path_buf(),
                });
            }
        }
        Ok(destination.to_path_buf())
    }

    fn copy_sources(&mut self, destination: &Path) -> Result<(), Halt> {
        fs::create_dir_all(destination).map_err(|e| OpsError::io(destination, e))?;

        let sources = Arc::clone(&self.sources);
        for source in sources.iter() {
            self.checkpoint()?;
            self.copy_tree(source, &target_for(source, destination))?;
        }
        Ok(())
    }

    /// Mirror `source` at `target`, depth-first, without recursion.
    fn copy_tree(&mut self, source: &Path, target: &Path) -> Result<(), Halt> {
        let mut pending = vec![(source.to_path_buf(), target.to_path_buf())];

        while let Some((from, to)) = pending.pop() {
            let metadata = fs::symlink_metadata(&from).map_err(|e| OpsError::io(&from, e))?;

            if metadata.is_dir() {
                fs::create_dir_all(&to).map_err(|e| OpsError::io(&to, e))?;
                // Reversed so names pop in sorted order
                for name in read_children(&from)?.into_iter().rev() {
                    pending.push((from.join(&name), to.join(&name)));
                }
                continue;
            }

            if !is_counted(metadata.file_type()) {
                tracing::debug!(path = %from.display(), "skipping special file");
                continue;
            }

            self.checkpoint()?;
            tracing::debug!(from = %from.display(), to = %to.display(), "copying file");
            let bytes = transfer_file(&from, &to, &self.options)?;
            let next = self
                .publisher
                .current()
                .with_file_transferred(display_name(&from), bytes);
            self.publish(next)?;
        }

        Ok(())
    }

    /// Try to rename every source into `destination`.
    ///
    /// On the first failure the renames already done are undone and `false`
    /// is returned, leaving every source where it was.
    fn rename_all(&self, destination: &Path) -> Result<bool, OpsError> {
        let mut renamed: Vec<(&Path, PathBuf)> = Vec::new();

        for source in self.sources.iter() {
            let target = target_for(source, destination);
            match self.renamer.rename(source, &target) {
                Ok(()) => renamed.push((source.as_path(), target)),
                Err(err) => {
                    tracing::debug!(source = %source.display(), %err, "rename not possible");
                    for (origin, moved) in renamed.iter().rev() {
                        self.renamer
                            .rename(moved, origin)
                            .map_err(|e| OpsError::io(moved.as_path(), e))?;
                    }
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    /// Delete `root`, one file at a time, directories after their contents.
    fn delete_tree(&mut self, root: &Path) -> Result<(), Halt> {
        let Some(metadata) = symlink_metadata_if_exists(root)? else {
            tracing::debug!(path = %root.display(), "already gone");
            return Ok(());
        };

        if !metadata.is_dir() {
            return self.delete_file(root, &metadata);
        }

        let mut pending = vec![root.to_path_buf()];
        let mut directories = Vec::new();

        while let Some(dir) = pending.pop() {
            for name in read_children(&dir)? {
                let path = dir.join(&name);
                let Some(metadata) = symlink_metadata_if_exists(&path)? else {
                    continue;
                };
                if metadata.is_dir() {
                    pending.push(path);
                } else {
                    self.checkpoint()?;
                    self.delete_file(&path, &metadata)?;
                }
            }
            directories.push(dir);
        }

        // Children were discovered after their parents
        for dir in directories.iter().rev() {
            match fs::remove_dir(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(OpsError::io(dir, e).into()),
            }
        }

        Ok(())
    }

    fn delete_file(&mut self, path: &Path, metadata: &fs::Metadata) -> Result<(), Halt> {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(OpsError::io(path, e).into()),
        }
        tracing::debug!(path = %path.display(), "deleted file");

        // Special files are removed but were never counted
        if !is_counted(metadata.file_type()) {
            return Ok(());
        }

        let bytes = if metadata.is_file() { metadata.len() } else { 0 };
        let next = self
            .publisher
            .current()
            .with_file_deleted(display_name(path), bytes);
        self.publish(next)
    }
}

/// Where `source` lands inside `destination`.
fn target_for(source: &Path, destination: &Path) -> PathBuf {
    destination.join(source.file_name().unwrap_or_default())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Names of the entries in `dir`, sorted.
fn read_children(dir: &Path) -> Result<Vec<OsString>, OpsError> {
    let entries = fs::read_dir(dir).map_err(|e| OpsError::io(dir, e))?;
    let mut names = entries
        .map(|entry| entry.map(|e| e.file_name()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| OpsError::io(dir, e))?;
    names.sort();
    Ok(names)
}

fn symlink_metadata_if_exists(path: &Path) -> Result<Option<fs::Metadata>, OpsError> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(OpsError::io(path, e)),
    }
}

/// Remove a file or a whole directory tree in one go.
fn remove_tree(path: &Path) -> Result<(), OpsError> {
    let Some(metadata) = symlink_metadata_if_exists(path)? else {
        return Ok(());
    };
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| OpsError::io(path, e))
}
