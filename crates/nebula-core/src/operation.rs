//! Operation snapshots.
//!
//! An [`Operation`] is never mutated once it has been handed out. Every
//! change produces a fresh value through one of the `with_*`/`into_*`
//! constructors, so a snapshot an observer holds keeps describing the moment
//! it was published.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a job, used as the cancellation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The kind of operation being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Copy,
    Move,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => write!(f, "Copy"),
            Self::Move => write!(f, "Move"),
            Self::Delete => write!(f, "Delete"),
        }
    }
}

/// Lifecycle state of a job.
///
/// `Completed`, `Cancelled` and `Failed` are terminal and absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Registered, totals not yet computed.
    Pending,
    /// Totals known, work in progress.
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    /// Whether no further snapshots can follow this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One immutable published state of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Stable identifier for the job's lifetime.
    pub id: OperationId,
    /// What the job does.
    pub kind: OperationKind,
    /// Paths to process, in processing order.
    pub source_paths: Arc<[PathBuf]>,
    /// Target directory for copy and move.
    pub destination_path: Option<PathBuf>,
    /// Number of files to process, computed before any mutation.
    pub total_files: usize,
    /// Number of bytes to process, computed before any mutation.
    pub total_bytes: u64,
    /// Files processed so far.
    pub processed_files: usize,
    /// Bytes processed so far.
    pub processed_bytes: u64,
    /// Name of the file most recently processed.
    pub current_file: Option<String>,
    /// Progress from 0 to 100, never decreasing.
    pub progress_percent: u8,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Why the job failed. Present only on a failed snapshot.
    pub error_message: Option<String>,
    /// When the job was submitted.
    pub started_at: DateTime<Utc>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Operation {
    /// Create the pending snapshot for a new job.
    pub fn new(
        kind: OperationKind,
        source_paths: Vec<PathBuf>,
        destination_path: Option<PathBuf>,
    ) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            source_paths: source_paths.into(),
            destination_path,
            total_files: 0,
            total_bytes: 0,
            processed_files: 0,
            processed_bytes: 0,
            current_file: None,
            progress_percent: 0,
            status: JobStatus::Pending,
            error_message: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Create a copy job.
    pub fn copy(source_paths: Vec<PathBuf>, destination: PathBuf) -> Self {
        Self::new(OperationKind::Copy, source_paths, Some(destination))
    }

    /// Create a move job.
    pub fn move_to(source_paths: Vec<PathBuf>, destination: PathBuf) -> Self {
        Self::new(OperationKind::Move, source_paths, Some(destination))
    }

    /// Create a delete job.
    pub fn delete(source_paths: Vec<PathBuf>) -> Self {
        Self::new(OperationKind::Delete, source_paths, None)
    }

    /// Whether the job finished normally.
    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    /// Whether the job was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.status == JobStatus::Cancelled
    }

    /// Whether the job failed.
    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    /// Whether no further snapshots will follow this one.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Snapshot with the up-front totals filled in; the job is now running.
    pub fn with_totals(&self, total_files: usize, total_bytes: u64) -> Self {
        if self.is_terminal() {
            return self.clone();
        }
        Self {
            total_files,
            total_bytes,
            status: JobStatus::Running,
            ..self.clone()
        }
    }

    /// Snapshot after one more file of `bytes` bytes has been transferred.
    ///
    /// Progress is measured in bytes, falling back to files when the job has
    /// no bytes to move.
    pub fn with_file_transferred(&self, name: impl Into<String>, bytes: u64) -> Self {
        if self.is_terminal() {
            return self.clone();
        }
        let processed_files = self.processed_files + 1;
        let processed_bytes = self.processed_bytes + bytes;
        let percent = if self.total_bytes > 0 {
            ratio_percent(processed_bytes, self.total_bytes)
        } else {
            ratio_percent(processed_files as u64, self.total_files as u64)
        };
        Self {
            processed_files,
            processed_bytes,
            current_file: Some(name.into()),
            progress_percent: self.progress_percent.max(percent),
            ..self.clone()
        }
    }

    /// Snapshot after one more file of `bytes` bytes has been deleted.
    ///
    /// Delete progress is measured in files.
    pub fn with_file_deleted(&self, name: impl Into<String>, bytes: u64) -> Self {
        if self.is_terminal() {
            return self.clone();
        }
        let processed_files = self.processed_files + 1;
        let percent = ratio_percent(processed_files as u64, self.total_files as u64);
        Self {
            processed_files,
            processed_bytes: self.processed_bytes + bytes,
            current_file: Some(name.into()),
            progress_percent: self.progress_percent.max(percent),
            ..self.clone()
        }
    }

    /// Terminal snapshot for a job that ran to the end.
    pub fn to_completed(&self, at: DateTime<Utc>) -> Self {
        if self.is_terminal() {
            return self.clone();
        }
        Self {
            status: JobStatus::Completed,
            progress_percent: 100,
            finished_at: Some(at),
            ..self.clone()
        }
    }

    /// Terminal snapshot for a move that was satisfied by renames alone.
    ///
    /// Counters jump straight to the totals.
    pub fn to_renamed(&self, at: DateTime<Utc>) -> Self {
        if self.is_terminal() {
            return self.clone();
        }
        Self {
            processed_files: self.total_files,
            processed_bytes: self.total_bytes,
            ..self.clone()
        }
        .to_completed(at)
    }

    /// Terminal snapshot for a cancelled job. Counters keep their values.
    pub fn to_cancelled(&self, at: DateTime<Utc>) -> Self {
        if self.is_terminal() {
            return self.clone();
        }
        Self {
            status: JobStatus::Cancelled,
            finished_at: Some(at),
            ..self.clone()
        }
    }

    /// Terminal snapshot for a failed job.
    pub fn to_failed(&self, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        if self.is_terminal() {
            return self.clone();
        }
        Self {
            status: JobStatus::Failed,
            error_message: Some(message.into()),
            finished_at: Some(at),
            ..self.clone()
        }
    }

    /// Time spent so far, or the job's full duration once it has finished.
    pub fn elapsed(&self) -> Duration {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    /// Estimate of the time left, extrapolated from elapsed time and percent.
    ///
    /// `None` before any progress has been made and once the job is over.
    pub fn remaining_time(&self) -> Option<Duration> {
        if self.progress_percent == 0 || self.is_terminal() {
            return None;
        }
        let elapsed = self.elapsed().as_millis();
        let estimated_total = elapsed * 100 / u128::from(self.progress_percent);
        let remaining = estimated_total.saturating_sub(elapsed);
        Some(Duration::from_millis(
            u64::try_from(remaining).unwrap_or(u64::MAX),
        ))
    }

    /// Human-readable description of the job's outcome so far.
    pub fn summary(&self) -> String {
        let action = match self.kind {
            OperationKind::Copy => "Copied",
            OperationKind::Move => "Moved",
            OperationKind::Delete => "Deleted",
        };

        match self.status {
            JobStatus::Pending => format!("{} pending", self.kind),
            JobStatus::Running => format!(
                "{} in progress: {}/{} files ({}%)",
                self.kind, self.processed_files, self.total_files, self.progress_percent
            ),
            JobStatus::Completed => format!("{} {} files", action, self.processed_files),
            JobStatus::Cancelled => format!(
                "{} cancelled after {} of {} files",
                self.kind, self.processed_files, self.total_files
            ),
            JobStatus::Failed => format!(
                "{} failed: {}",
                self.kind,
                self.error_message.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

/// `done * 100 / total`, floored and clamped to 100. Zero when `total` is zero.
fn ratio_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = u128::from(done) * 100 / u128::from(total);
    percent.min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_copy(files: usize, bytes: u64) -> Operation {
        Operation::copy(vec![PathBuf::from("/src/a")], PathBuf::from("/dst"))
            .with_totals(files, bytes)
    }

    #[test]
    fn test_new_operation_is_pending() {
        let op = Operation::delete(vec![PathBuf::from("/tmp/x")]);
        assert_eq!(op.status, JobStatus::Pending);
        assert_eq!(op.processed_files, 0);
        assert!(op.destination_path.is_none());
        assert!(op.finished_at.is_none());
    }

    #[test]
    fn test_ids_are_unique_and_parse_back() {
        let a = OperationId::new();
        let b = OperationId::new();
        assert_ne!(a, b);

        let parsed: OperationId = a.to_string().parse().unwrap();
        assert_eq!(parsed, a);
        assert!("not-an-id".parse::<OperationId>().is_err());
    }

    #[test]
    fn test_progress_is_byte_based_and_floored() {
        let op = running_copy(3, 300);
        let op = op.with_file_transferred("a", 100);
        assert_eq!(op.progress_percent, 33);
        let op = op.with_file_transferred("b", 100);
        assert_eq!(op.progress_percent, 66);
        assert_eq!(op.current_file.as_deref(), Some("b"));
        assert_eq!(op.processed_files, 2);
        assert_eq!(op.processed_bytes, 200);
    }

    #[test]
    fn test_progress_falls_back_to_files_for_empty_files() {
        let op = running_copy(4, 0).with_file_transferred("empty", 0);
        assert_eq!(op.progress_percent, 25);
    }

    #[test]
    fn test_progress_clamped_when_tree_grew() {
        let op = running_copy(1, 10).with_file_transferred("grown", 50);
        assert_eq!(op.progress_percent, 100);
    }

    #[test]
    fn test_progress_never_decreases() {
        let op = running_copy(2, 100).with_file_transferred("a", 80);
        assert_eq!(op.progress_percent, 80);
        // Totals went stale: a later measurement must not pull the bar back.
        let op = Operation {
            total_bytes: 1000,
            ..op
        }
        .with_file_transferred("b", 10);
        assert_eq!(op.progress_percent, 80);
    }

    #[test]
    fn test_snapshots_are_not_mutated() {
        let first = running_copy(2, 100);
        let second = first.with_file_transferred("a", 50);
        assert_eq!(first.processed_files, 0);
        assert_eq!(second.processed_files, 1);
        assert!(Arc::ptr_eq(&first.source_paths, &second.source_paths));
    }

    #[test]
    fn test_delete_progress_is_file_based() {
        let op = Operation::delete(vec![PathBuf::from("/tmp/d")]).with_totals(4, 4000);
        let op = op.with_file_deleted("one", 3900);
        assert_eq!(op.progress_percent, 25);
        assert_eq!(op.processed_bytes, 3900);
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        let now = Utc::now();
        let done = running_copy(1, 1).to_completed(now);
        assert!(done.is_completed());
        assert_eq!(done.progress_percent, 100);

        let still_done = done.to_cancelled(Utc::now());
        assert!(still_done.is_completed());
        assert!(!still_done.is_cancelled());
        assert_eq!(still_done.finished_at, Some(now));

        let cancelled = running_copy(1, 1).to_cancelled(now);
        assert!(cancelled.to_failed("late", now).is_cancelled());
        assert!(cancelled.with_file_transferred("x", 1).processed_files == 0);
    }

    #[test]
    fn test_failed_snapshot_carries_message() {
        let failed = running_copy(1, 1).to_failed("disk full", Utc::now());
        assert!(failed.is_failed());
        assert!(!failed.is_completed());
        assert!(!failed.is_cancelled());
        assert_eq!(failed.error_message.as_deref(), Some("disk full"));
        assert!(failed.summary().contains("disk full"));
    }

    #[test]
    fn test_renamed_jumps_to_totals() {
        let op = Operation::move_to(vec![PathBuf::from("/a")], PathBuf::from("/b"))
            .with_totals(7, 700)
            .to_renamed(Utc::now());
        assert!(op.is_completed());
        assert_eq!(op.processed_files, 7);
        assert_eq!(op.processed_bytes, 700);
        assert_eq!(op.progress_percent, 100);
    }

    #[test]
    fn test_remaining_time() {
        let op = running_copy(2, 100);
        assert!(op.remaining_time().is_none());

        let op = Operation {
            started_at: Utc::now() - chrono::Duration::seconds(10),
            ..op.with_file_transferred("a", 50)
        };
        let remaining = op.remaining_time().unwrap();
        assert!(remaining >= Duration::from_secs(9));
        assert!(remaining <= Duration::from_secs(12));

        assert!(op.to_completed(Utc::now()).remaining_time().is_none());
    }
}
