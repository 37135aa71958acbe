use crate::{
    error::{Error, Failure, Result},
    task::TaskHandle,
    types::TaskId,
};
use derive_more::Display;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;
use tracing::debug;

/// Sleep between polls while a pool worker waits on a group and finds no
/// work to help with.
const IDLE_BACKOFF: Duration = Duration::from_micros(200);

/// Lifecycle of a task group.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupPhase {
    /// Accepting spawns.
    Open,
    /// Join issued; waiting for the registered tasks.
    Closing,
    /// All tasks done, handles released.
    Closed,
}

/// Owner of the in-flight tasks of one region or synchronization group.
#[derive(Debug)]
pub(crate) struct TaskGroup {
    depth: usize,
    state: Mutex<GroupState>,
    idle: Condvar,
}

#[derive(Debug)]
struct GroupState {
    phase: GroupPhase,
    pending: usize,
    handles: Vec<TaskHandle>,
    failures: Vec<(TaskId, Failure)>,
}

impl TaskGroup {
    pub(crate) fn new(depth: usize) -> Self {
        Self {
            depth,
            state: Mutex::new(GroupState {
                phase: GroupPhase::Open,
                pending: 0,
                handles: Vec::new(),
                failures: Vec::new(),
            }),
            idle: Condvar::new(),
        }
    }

    /// Nesting level; 0 is the region itself.
    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn phase(&self) -> GroupPhase {
        self.state.lock().phase
    }

    /// Track a task about to be submitted.
    pub(crate) fn register(&self, handle: &TaskHandle) -> Result<()> {
        let mut state = self.state.lock();
        if state.phase != GroupPhase::Open {
            return Err(Error::invalid_state(format!(
                "cannot spawn into a synchronization group that is {}",
                state.phase
            )));
        }
        state.pending += 1;
        state.handles.push(handle.clone());
        Ok(())
    }

    /// Called once by every registered task when its body returned.
    pub(crate) fn task_finished(&self, id: TaskId, failure: Option<Failure>) {
        let mut state = self.state.lock();
        if let Some(failure) = failure {
            state.failures.push((id, failure));
        }
        state.pending = state
            .pending
            .checked_sub(1)
            .expect("TaskGroup::task_finished: [1]");
        if state.pending == 0 {
            self.idle.notify_all();
        }
    }

    /// Adopt failures of a nested group that was closed without reporting.
    pub(crate) fn adopt_failures(&self, failures: Vec<(TaskId, Failure)>) {
        self.state.lock().failures.extend(failures);
    }

    /// Join every registered task and close the group.
    ///
    /// Returns the failures of the group's tasks ordered by task id. Fails
    /// with [`Error::InvalidState`] if the group was already joined.
    pub(crate) fn close(&self) -> Result<Vec<(TaskId, Failure)>> {
        {
            let mut state = self.state.lock();
            if state.phase != GroupPhase::Open {
                return Err(Error::invalid_state(format!(
                    "synchronization group is already {}",
                    state.phase
                )));
            }
            state.phase = GroupPhase::Closing;
            debug!(
                depth = self.depth,
                pending = state.pending,
                tasks = state.handles.len(),
                "joining task group"
            );
        }
        self.wait_idle();
        let mut state = self.state.lock();
        state.phase = GroupPhase::Closed;
        state.handles.clear();
        let mut failures = core::mem::take(&mut state.failures);
        failures.sort_by_key(|(id, _)| *id);
        Ok(failures)
    }

    /// Block until no registered task is pending.
    ///
    /// On a pool worker the wait runs other queued jobs of the pool, which is
    /// what keeps groups joined from inside task or loop bodies from starving
    /// the pool. Elsewhere it sleeps on the condition variable.
    fn wait_idle(&self) {
        loop {
            if self.state.lock().pending == 0 {
                return;
            }
            match rayon::yield_now() {
                Some(rayon::Yield::Executed) => {}
                Some(rayon::Yield::Idle) => {
                    let mut state = self.state.lock();
                    if state.pending != 0 {
                        let _ = self.idle.wait_for(&mut state, IDLE_BACKOFF);
                    }
                }
                None => {
                    let mut state = self.state.lock();
                    while state.pending != 0 {
                        self.idle.wait(&mut state);
                    }
                    return;
                }
            }
        }
    }
}

/// Fold failures gathered at a join point into the error returned there.
pub(crate) fn failures_to_result(failures: Vec<(TaskId, Failure)>) -> Result<()> {
    match Error::from_failures(failures.into_iter().map(|(_, failure)| failure)) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
