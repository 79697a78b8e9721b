//! Submission and cancellation boundary.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use nebula_core::{EngineConfig, Operation, OperationId};

use crate::channel::{ProgressStream, Publisher};
use crate::executor::Executor;
use crate::registry::JobRegistry;
use crate::renamer::{FsRenamer, Renamer};
use crate::transfer::TransferOptions;

/// Starts file operations in the background and cancels them by id.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Debug, Clone)]
pub struct OperationEngine {
    config: EngineConfig,
    registry: Arc<JobRegistry>,
    renamer: Arc<dyn Renamer>,
}

impl Default for OperationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationEngine {
    /// Create an engine with default settings.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with the given settings.
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            registry: Arc::new(JobRegistry::new()),
            renamer: Arc::new(FsRenamer),
        }
    }

    /// Use a different rename strategy for the move fast path.
    pub fn with_renamer(mut self, renamer: impl Renamer + 'static) -> Self {
        self.renamer = Arc::new(renamer);
        self
    }

    /// Track jobs in an existing registry.
    pub fn with_registry(mut self, registry: Arc<JobRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// The engine's settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The registry of running jobs.
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Copy `sources` into the directory `destination`.
    pub fn submit_copy(&self, sources: Vec<PathBuf>, destination: PathBuf) -> ProgressStream {
        self.submit(Operation::copy(sources, destination))
    }

    /// Move `sources` into the directory `destination`.
    pub fn submit_move(&self, sources: Vec<PathBuf>, destination: PathBuf) -> ProgressStream {
        self.submit(Operation::move_to(sources, destination))
    }

    /// Delete `sources` recursively.
    pub fn submit_delete(&self, sources: Vec<PathBuf>) -> ProgressStream {
        self.submit(Operation::delete(sources))
    }

    /// Register `operation` and start it on a blocking worker.
    ///
    /// The job is registered before this returns, so it can be cancelled
    /// straight away. Must be called from within a Tokio runtime.
    pub fn submit(&self, operation: Operation) -> ProgressStream {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let id = operation.id;

        let slot = self.registry.register(operation.clone());
        let token = slot.token().clone();
        let publisher = Publisher::new(operation, slot, Arc::clone(&self.registry), tx);
        let executor = Executor::new(
            publisher,
            token,
            TransferOptions::from(&self.config),
            Arc::clone(&self.renamer),
        );

        tokio::task::spawn_blocking(move || executor.run());

        ProgressStream::new(id, rx)
    }

    /// Request cancellation of a running job.
    ///
    /// Unknown or finished ids are ignored.
    pub fn cancel(&self, id: &OperationId) {
        self.registry.cancel(id);
    }

    /// Latest snapshots of every running job.
    pub fn active(&self) -> Vec<Operation> {
        self.registry.active()
    }
}
