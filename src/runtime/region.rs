use crate::{
    config::BackendKind,
    error::{Error, Failure, Result},
    runtime::{
        Runtime,
        group::{GroupPhase, TaskGroup, failures_to_result},
        scheduler::{Scheduler, TaskRecord},
    },
    splitter::Splitter,
    task::{Access, Outcome, TaskHandle, run_body},
    types::{Range, TaskId},
};
use core::cell::RefCell;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Scope in which tasks can be spawned.
///
/// Created by [`Runtime::task_region`]. The region is itself the outermost
/// task group: tasks spawned outside any synchronization group are joined
/// when the region exits. Synchronization groups nest inside it; a spawn
/// registers with the innermost open one.
///
/// Task bodies may borrow anything that outlives the region (`'r`). They run
/// on the runtime's pool (inline for the sequential backend) and may issue
/// nested parallel loops or regions of their own.
pub struct TaskRegion<'a, 'r> {
    runtime: &'a Runtime,
    scheduler: Box<dyn Scheduler<'r> + 'a>,
    /// Open groups, innermost last. Index 0 is the region's own group.
    groups: RefCell<Vec<Arc<TaskGroup>>>,
}

impl core::fmt::Debug for TaskRegion<'_, '_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskRegion")
            .field("backend", &self.backend())
            .field("depth", &self.depth())
            .finish_non_exhaustive()
    }
}

impl<'a, 'r> TaskRegion<'a, 'r> {
    pub(crate) fn new(runtime: &'a Runtime, scheduler: Box<dyn Scheduler<'r> + 'a>) -> Self {
        debug!(backend = %runtime.backend(), "entering task region");
        Self {
            runtime,
            scheduler,
            groups: RefCell::new(vec![Arc::new(TaskGroup::new(0))]),
        }
    }

    /// Backend the region's tasks run on.
    #[must_use]
    pub fn backend(&self) -> BackendKind {
        self.runtime.backend()
    }

    /// Number of open synchronization groups.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.groups.borrow().len() - 1
    }

    fn innermost(&self) -> Arc<TaskGroup> {
        self.groups
            .borrow()
            .last()
            .expect("TaskRegion::innermost: [1]")
            .clone()
    }

    /// Spawn a task with declared `access` into the innermost open group.
    ///
    /// Under the sequential backend the body runs before `spawn` returns.
    /// Under the dataflow backend it runs once every conflicting task spawned
    /// earlier in this region has finished.
    ///
    /// # Errors
    /// Never for the innermost group, which is open by construction; see
    /// [`SyncGroup::spawn`].
    pub fn spawn<F, O>(&self, access: Access, body: F) -> Result<TaskHandle>
    where
        F: FnOnce() -> O + Send + 'r,
        O: Outcome,
    {
        self.spawn_into(&self.innermost(), access, body)
    }

    fn spawn_into<F, O>(&self, group: &Arc<TaskGroup>, access: Access, body: F) -> Result<TaskHandle>
    where
        F: FnOnce() -> O + Send + 'r,
        O: Outcome,
    {
        let handle = TaskHandle::new(self.runtime.next_task_id());
        group.register(&handle)?;
        trace!(task = handle.id(), depth = group.depth(), "task spawned");
        self.scheduler.submit(TaskRecord {
            handle: handle.clone(),
            access: Arc::new(access),
            group: group.clone(),
            checker: self.runtime.conflict_checker(),
            body: Box::new(move || run_body(body)),
        });
        Ok(handle)
    }

    /// Spawn one task per range of `splitter.split(size)`, each with the same
    /// declared access.
    ///
    /// # Errors
    /// See [`TaskRegion::spawn`].
    pub fn spawn_blocks<F, O>(
        &self,
        splitter: &Splitter,
        size: usize,
        access: &Access,
        body: F,
    ) -> Result<Vec<TaskHandle>>
    where
        F: Fn(Range) -> O + Send + Sync + 'r,
        O: Outcome,
    {
        let body = Arc::new(body);
        splitter
            .split(size)
            .into_iter()
            .map(|range| {
                let body = body.clone();
                self.spawn(access.clone(), move || body(range))
            })
            .collect()
    }

    /// Open a synchronization group. Spawns go to it until it is ended or a
    /// nested group is opened.
    ///
    /// The group is joined by [`SyncGroup::end`], or when the guard is
    /// dropped; in the latter case failures move to the enclosing group and
    /// surface at its join.
    pub fn begin_sync_group(&self) -> SyncGroup<'_, 'a, 'r> {
        let group = {
            let mut groups = self.groups.borrow_mut();
            let group = Arc::new(TaskGroup::new(groups.len()));
            groups.push(group.clone());
            group
        };
        trace!(depth = group.depth(), "synchronization group opened");
        SyncGroup {
            region: self,
            group,
            ended: false,
        }
    }

    /// End the innermost open synchronization group, joining its tasks.
    ///
    /// # Errors
    /// [`Error::InvalidState`] if no synchronization group is open;
    /// [`Error::PropagatedFailure`] if a task of the group failed.
    pub fn end_sync_group(&self) -> Result<()> {
        let group = {
            let groups = self.groups.borrow();
            if groups.len() < 2 {
                return Err(Error::invalid_state("no synchronization group is open"));
            }
            groups.last().expect("TaskRegion::end_sync_group: [1]").clone()
        };
        self.close_group(&group)
    }

    /// Run `op` inside a synchronization group and join it on exit.
    ///
    /// # Errors
    /// [`Error::PropagatedFailure`] if a task of the group failed. Tasks are
    /// always joined, even when `op` panics.
    pub fn sync_group<F, R>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&Self) -> R,
    {
        let guard = self.begin_sync_group();
        let out = op(self);
        guard.end()?;
        Ok(out)
    }

    /// Join every group opened after `group`, innermost first, moving their
    /// failures into `group`.
    fn close_nested(&self, group: &Arc<TaskGroup>) {
        loop {
            let top = self.innermost();
            if Arc::ptr_eq(&top, group) || top.depth() <= group.depth() {
                break;
            }
            // Guards leaked with `mem::forget` leave their group open.
            if let Ok(failures) = self.join_group(&top) {
                group.adopt_failures(failures);
            }
        }
    }

    /// Join `group` and take it off the stack wherever it is.
    fn close_group(&self, group: &Arc<TaskGroup>) -> Result<()> {
        let failures = self.join_group(group)?;
        failures_to_result(failures)
    }

    fn join_group(&self, group: &Arc<TaskGroup>) -> Result<Vec<(TaskId, Failure)>> {
        let result = group.close();
        self.groups.borrow_mut().retain(|open| !Arc::ptr_eq(open, group));
        result
    }

    /// Join every group still open, innermost first, then the region's own
    /// group.
    pub(crate) fn finish(self) -> Result<()> {
        let root = self.groups.borrow()[0].clone();
        self.close_nested(&root);
        let result = self.close_group(&root);
        debug!(ok = result.is_ok(), "leaving task region");
        result
    }
}

/// Guard of an open synchronization group.
///
/// Ending the guard (or dropping it) is the group's join point: it blocks
/// until every task spawned into the group has finished, on every backend.
#[must_use = "dropping the guard joins the group immediately"]
pub struct SyncGroup<'g, 'a, 'r> {
    region: &'g TaskRegion<'a, 'r>,
    group: Arc<TaskGroup>,
    ended: bool,
}

impl core::fmt::Debug for SyncGroup<'_, '_, '_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SyncGroup")
            .field("depth", &self.group.depth())
            .field("phase", &self.group.phase())
            .finish_non_exhaustive()
    }
}

impl<'r> SyncGroup<'_, '_, 'r> {
    /// Spawn into this group, even if a nested group is open.
    ///
    /// # Errors
    /// [`Error::InvalidState`] if the group was already ended through
    /// [`TaskRegion::end_sync_group`].
    pub fn spawn<F, O>(&self, access: Access, body: F) -> Result<TaskHandle>
    where
        F: FnOnce() -> O + Send + 'r,
        O: Outcome,
    {
        self.region.spawn_into(&self.group, access, body)
    }

    /// Join the group's tasks and close it.
    ///
    /// Groups opened inside this one and still open are joined first,
    /// innermost first; their failures surface here.
    ///
    /// # Errors
    /// - [`Error::InvalidState`] if the group was already ended.
    /// - [`Error::PropagatedFailure`] if a task of the group or of a nested
    ///   group failed.
    pub fn end(mut self) -> Result<()> {
        self.ended = true;
        if self.group.phase() != GroupPhase::Open {
            return Err(Error::invalid_state(
                "synchronization group was already ended",
            ));
        }
        self.region.close_nested(&self.group);
        self.region.close_group(&self.group)
    }
}

impl Drop for SyncGroup<'_, '_, '_> {
    fn drop(&mut self) {
        if self.ended || self.group.phase() != GroupPhase::Open {
            return;
        }
        self.region.close_nested(&self.group);
        match self.region.join_group(&self.group) {
            Ok(failures) if failures.is_empty() => {}
            Ok(failures) => {
                warn!(
                    depth = self.group.depth(),
                    failures = failures.len(),
                    "dropped synchronization group had failures; reporting them to the enclosing group"
                );
                self.region.innermost().adopt_failures(failures);
            }
            Err(err) => warn!(%err, "dropped synchronization group could not be joined"),
        }
    }
}
