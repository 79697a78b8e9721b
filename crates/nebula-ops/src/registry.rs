//! Registry of running jobs.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use nebula_core::{Operation, OperationId};

/// The live state of one job: its latest snapshot and its cancellation token.
///
/// The executor is the only writer of progress; cancellers only ever flip the
/// job to `Cancelled`, which is one-way.
#[derive(Debug, Clone)]
pub struct JobSlot {
    state: Arc<watch::Sender<Operation>>,
    token: CancellationToken,
}

impl JobSlot {
    fn new(initial: Operation) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state: Arc::new(state),
            token: CancellationToken::new(),
        }
    }

    /// The latest snapshot.
    pub fn snapshot(&self) -> Operation {
        self.state.borrow().clone()
    }

    /// Follow the latest snapshot as it changes.
    pub fn subscribe(&self) -> watch::Receiver<Operation> {
        self.state.subscribe()
    }

    /// Token tripped when the job is cancelled.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Mark the job cancelled unless it already reached a terminal state.
    ///
    /// Returns `true` if this call changed anything.
    fn cancel(&self) -> bool {
        let changed = self.state.send_if_modified(|op| {
            if op.is_terminal() {
                return false;
            }
            *op = op.to_cancelled(Utc::now());
            true
        });
        if changed {
            self.token.cancel();
        }
        changed
    }

    /// Replace the latest snapshot, letting a pending cancellation win.
    ///
    /// `build` receives the stored snapshot and returns the replacement. The
    /// stored value is handed back.
    pub(crate) fn update(&self, build: impl FnOnce(&Operation) -> Operation) -> Operation {
        let mut stored = None;
        self.state.send_modify(|op| {
            *op = build(op);
            stored = Some(op.clone());
        });
        stored.unwrap_or_else(|| self.snapshot())
    }
}

/// Concurrent map from operation id to the job's live slot.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<OperationId, JobSlot>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new job, returning its slot.
    pub fn register(&self, initial: Operation) -> JobSlot {
        let id = initial.id;
        let slot = JobSlot::new(initial);
        self.jobs.insert(id, slot.clone());
        tracing::debug!(%id, "registered operation");
        slot
    }

    /// Request cancellation of a job.
    ///
    /// Unknown and already finished ids are ignored. Returns `true` if the
    /// job was running and is now marked cancelled.
    pub fn cancel(&self, id: &OperationId) -> bool {
        // Clone out of the map so no shard lock is held while notifying
        let Some(slot) = self.jobs.get(id).map(|entry| entry.value().clone()) else {
            tracing::debug!(%id, "cancel for unknown operation ignored");
            return false;
        };
        let changed = slot.cancel();
        if changed {
            tracing::info!(%id, "cancellation requested");
        }
        changed
    }

    /// Stop tracking a job, returning its last snapshot.
    pub fn unregister(&self, id: &OperationId) -> Option<Operation> {
        let (_, slot) = self.jobs.remove(id)?;
        tracing::debug!(%id, "unregistered operation");
        Some(slot.snapshot())
    }

    /// Latest snapshot of a live job.
    pub fn snapshot(&self, id: &OperationId) -> Option<Operation> {
        self.jobs.get(id).map(|entry| entry.value().snapshot())
    }

    /// Follow a live job's latest snapshot.
    pub fn watch(&self, id: &OperationId) -> Option<watch::Receiver<Operation>> {
        self.jobs.get(id).map(|entry| entry.value().subscribe())
    }

    /// Whether a job with this id is live.
    pub fn contains(&self, id: &OperationId) -> bool {
        self.jobs.contains_key(id)
    }

    /// Latest snapshots of every live job.
    pub fn active(&self) -> Vec<Operation> {
        self.jobs.iter().map(|entry| entry.value().snapshot()).collect()
    }

    /// Number of live jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no job is live.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn running() -> Operation {
        Operation::delete(vec![PathBuf::from("/tmp/x")]).with_totals(2, 0)
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = JobRegistry::new();
        let op = running();
        let id = op.id;

        registry.register(op);
        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.active().len(), 1);

        let last = registry.unregister(&id).unwrap();
        assert_eq!(last.id, id);
        assert!(registry.is_empty());
        assert!(registry.unregister(&id).is_none());
    }

    #[test]
    fn test_cancel_marks_snapshot_and_token() {
        let registry = JobRegistry::new();
        let op = running();
        let id = op.id;
        let slot = registry.register(op);

        assert!(registry.cancel(&id));
        assert!(slot.is_cancelled());

        let snapshot = registry.snapshot(&id).unwrap();
        assert!(snapshot.is_cancelled());
        assert!(snapshot.finished_at.is_some());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let registry = JobRegistry::new();
        let op = running();
        let id = op.id;
        registry.register(op);

        assert!(registry.cancel(&id));
        let first = registry.snapshot(&id).unwrap();
        assert!(!registry.cancel(&id));
        assert_eq!(registry.snapshot(&id).unwrap(), first);
    }

    #[test]
    fn test_cancel_unknown_id_is_noop() {
        let registry = JobRegistry::new();
        assert!(!registry.cancel(&OperationId::new()));
    }

    #[test]
    fn test_cancel_does_not_touch_completed() {
        let registry = JobRegistry::new();
        let op = running();
        let id = op.id;
        let slot = registry.register(op);

        let done = slot.update(|op| op.to_completed(Utc::now()));
        assert!(done.is_completed());

        assert!(!registry.cancel(&id));
        assert!(!slot.is_cancelled());
        assert_eq!(registry.snapshot(&id).unwrap(), done);
    }

    #[test]
    fn test_watchers_see_cancellation() {
        let registry = JobRegistry::new();
        let op = running();
        let id = op.id;
        registry.register(op);

        let mut rx = registry.watch(&id).unwrap();
        assert!(!rx.borrow_and_update().is_cancelled());

        registry.cancel(&id);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow().is_cancelled());
    }

    #[test]
    fn test_concurrent_cancel_and_register() {
        let registry = Arc::new(JobRegistry::new());
        let ops: Vec<Operation> = (0..32).map(|_| running()).collect();
        for op in &ops {
            registry.register(op.clone());
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let ids: Vec<_> = ops.iter().map(|op| op.id).collect();
                std::thread::spawn(move || {
                    for id in ids {
                        registry.cancel(&id);
                        registry.register(running());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 32 + 4 * 32);
        for op in &ops {
            assert!(registry.snapshot(&op.id).unwrap().is_cancelled());
        }
    }
}
