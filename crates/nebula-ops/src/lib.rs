//! File operations engine for nebula.
//!
//! This crate runs copy, move and delete jobs on blocking worker threads and
//! reports their progress as a stream of immutable [`Operation`] snapshots.
//! Running jobs are tracked in a [`JobRegistry`] so that any caller holding
//! the job's id can cancel it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use nebula_ops::OperationEngine;
//!
//! # async fn run() {
//! let engine = OperationEngine::new();
//! let mut progress = engine.submit_copy(
//!     vec![PathBuf::from("/data/photos")],
//!     PathBuf::from("/backup"),
//! );
//!
//! while let Some(snapshot) = progress.recv().await {
//!     println!("{}% {:?}", snapshot.progress_percent, snapshot.current_file);
//! }
//! # }
//! ```
//!
//! # Cancellation
//!
//! [`OperationEngine::cancel`] is observed before each top-level source and
//! before each file. A file that is already being transferred always runs to
//! the end.

mod channel;
mod engine;
mod executor;
mod registry;
mod renamer;
mod transfer;

pub use channel::ProgressStream;
pub use engine::OperationEngine;
pub use registry::{JobRegistry, JobSlot};
pub use renamer::{FsRenamer, Renamer};
pub use transfer::{transfer_file, TransferOptions};

// Re-export core types for convenience
pub use nebula_core::{
    EngineConfig, JobStatus, Operation, OperationId, OperationKind, OpsError, OpsResult,
};
