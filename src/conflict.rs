use crate::{task::Access, types::TaskId};
use core::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// Debug-time detector of conflicting tasks running at the same time.
///
/// Every task body is bracketed by [`ConflictChecker::enter`] and the drop of
/// the returned guard. Entering compares the task's declared access with the
/// declarations of the tasks currently running; a write/write, write/read or
/// read/write overlap on a buffer is logged and counted. Under the dataflow
/// backend the count stays zero; under the explicit-synch backend a non-zero
/// count means conflicting tasks were spawned into the same synchronization
/// group.
#[derive(Debug, Default)]
pub struct ConflictChecker {
    running: Mutex<Vec<(TaskId, Arc<Access>)>>,
    observed: AtomicUsize,
}

/// Keeps a task registered as running until dropped.
#[derive(Debug)]
#[must_use]
pub struct RunningTask<'a> {
    checker: &'a ConflictChecker,
    id: TaskId,
}

impl ConflictChecker {
    /// Checker with no running task.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register task `id` as running with declaration `access`.
    pub fn enter(&self, id: TaskId, access: &Arc<Access>) -> RunningTask<'_> {
        let mut running = self.running.lock();
        for (other_id, other) in running.iter() {
            if let Some(buffer) = access.conflict_with(other) {
                self.observed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    task = id,
                    other = *other_id,
                    %buffer,
                    "conflicting tasks are running concurrently"
                );
            }
        }
        running.push((id, access.clone()));
        RunningTask { checker: self, id }
    }

    /// Number of conflicting pairs observed so far.
    #[must_use]
    pub fn observed(&self) -> usize {
        self.observed.load(Ordering::Relaxed)
    }
}

impl Drop for RunningTask<'_> {
    fn drop(&mut self) {
        let mut running = self.checker.running.lock();
        if let Some(pos) = running.iter().position(|(id, _)| *id == self.id) {
            running.swap_remove(pos);
        }
    }
}
