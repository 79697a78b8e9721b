//! Snapshot delivery from a job's worker to its observer.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use nebula_core::{Operation, OperationId, OpsError};

use crate::registry::{JobRegistry, JobSlot};

/// Ordered, finite stream of one job's snapshots.
///
/// The first snapshot has no progress yet; the last one is terminal. The
/// stream ends right after the terminal snapshot. Dropping it does not
/// cancel the job.
#[derive(Debug)]
pub struct ProgressStream {
    id: OperationId,
    rx: mpsc::Receiver<Operation>,
}

impl ProgressStream {
    pub(crate) fn new(id: OperationId, rx: mpsc::Receiver<Operation>) -> Self {
        Self { id, rx }
    }

    /// Id of the job, usable with [`crate::OperationEngine::cancel`].
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Next snapshot, or `None` once the job has finished.
    pub async fn recv(&mut self) -> Option<Operation> {
        self.rx.recv().await
    }

    /// Blocking variant of [`recv`](Self::recv) for synchronous callers.
    ///
    /// Panics if called from within an async runtime.
    pub fn blocking_recv(&mut self) -> Option<Operation> {
        self.rx.blocking_recv()
    }

    /// Wait for the job to end and return every snapshot it published.
    pub async fn collect(mut self) -> Vec<Operation> {
        let mut snapshots = Vec::new();
        while let Some(snapshot) = self.rx.recv().await {
            snapshots.push(snapshot);
        }
        snapshots
    }

    /// Wait for the job to end and return its terminal snapshot.
    pub async fn finish(mut self) -> Option<Operation> {
        let mut last = None;
        while let Some(snapshot) = self.rx.recv().await {
            last = Some(snapshot);
        }
        last
    }

    /// Adapt into a [`tokio_stream::Stream`].
    pub fn into_stream(self) -> ReceiverStream<Operation> {
        ReceiverStream::new(self.rx)
    }
}

/// Worker side of a job: writes snapshots to the registry slot and the
/// observer's stream, in that order.
///
/// After a terminal snapshot the publisher is closed and ignores further
/// snapshots. The job is deregistered as the terminal snapshot is stored.
#[derive(Debug)]
pub(crate) struct Publisher {
    current: Operation,
    slot: JobSlot,
    registry: Arc<JobRegistry>,
    tx: mpsc::Sender<Operation>,
    closed: bool,
}

impl Publisher {
    pub(crate) fn new(
        initial: Operation,
        slot: JobSlot,
        registry: Arc<JobRegistry>,
        tx: mpsc::Sender<Operation>,
    ) -> Self {
        Self {
            current: initial,
            slot,
            registry,
            tx,
            closed: false,
        }
    }

    /// The last snapshot this publisher stored.
    pub(crate) fn current(&self) -> &Operation {
        &self.current
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Publish `next` and return what observers actually received.
    ///
    /// If the job was cancelled through the registry since the last publish,
    /// the cancellation wins: the published snapshot is the cancelled form of
    /// `next` (or of the previous snapshot, when `next` was itself terminal).
    pub(crate) fn publish(&mut self, next: Operation) -> &Operation {
        if self.closed {
            return &self.current;
        }

        let previous = &self.current;
        let stored = self.slot.update(|latest| {
            if latest.is_cancelled() {
                let at = latest.finished_at.unwrap_or_else(Utc::now);
                let base = if next.is_terminal() { previous } else { &next };
                if next.is_failed() {
                    tracing::warn!(
                        id = %next.id,
                        error = next.error_message.as_deref().unwrap_or_default(),
                        "failure after cancellation, reporting cancelled"
                    );
                }
                base.to_cancelled(at)
            } else {
                next.clone()
            }
        });

        if stored.is_terminal() {
            self.closed = true;
            self.registry.unregister(&stored.id);
        }

        // A dropped stream only means nobody is watching any more
        if self.tx.blocking_send(stored.clone()).is_err() {
            tracing::trace!(id = %stored.id, "progress stream dropped");
        }

        self.current = stored;
        &self.current
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Worker ended without a terminal snapshot (panic or never ran)
        let reason = OpsError::Worker {
            message: "worker stopped before finishing".to_string(),
        };
        let failed = self.current.to_failed(reason.to_string(), Utc::now());
        let stored = self.slot.update(|latest| {
            if latest.is_cancelled() {
                self.current.to_cancelled(latest.finished_at.unwrap_or_else(Utc::now))
            } else {
                failed.clone()
            }
        });
        self.closed = true;
        self.registry.unregister(&stored.id);
        if let Err(err) = self.tx.try_send(stored) {
            tracing::debug!(id = %self.current.id, %err, "terminal snapshot not delivered");
        }
    }
}
