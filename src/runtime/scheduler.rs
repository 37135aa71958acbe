use crate::{
    conflict::ConflictChecker,
    dataflow::{DependencyTracker, Node},
    error::Failure,
    runtime::group::TaskGroup,
    sync::Arc,
    task::{Access, DeclaredAccessScope, TaskHandle},
    utils::SplitAtHalf,
};
use derive_more::Debug;
use rayon::Scope;
use std::sync::Arc as StdArc;
use tracing::{trace, warn};

/// A spawned task on its way to a backend.
#[derive(Debug)]
pub(crate) struct TaskRecord<'r> {
    pub(crate) handle: TaskHandle,
    pub(crate) access: StdArc<Access>,
    pub(crate) group: StdArc<TaskGroup>,
    pub(crate) checker: Option<StdArc<ConflictChecker>>,
    #[debug(skip)]
    pub(crate) body: Box<dyn FnOnce() -> Option<Failure> + Send + 'r>,
}

impl TaskRecord<'_> {
    /// Run the body and report completion to the task's group.
    pub(crate) fn run(self) {
        let Self {
            handle,
            access,
            group,
            checker,
            body,
        } = self;
        let id = handle.id();
        trace!(task = id, depth = group.depth(), "task started");
        let failure = {
            let _running = checker.as_deref().map(|checker| checker.enter(id, &access));
            let _declared = DeclaredAccessScope::enter(&access);
            body()
        };
        if let Some(failure) = &failure {
            warn!(task = id, %failure, "task failed");
        } else {
            trace!(task = id, "task finished");
        }
        handle.finish(failure.is_some());
        group.task_finished(id, failure);
    }
}

/// Submission policy of a backend inside one task region.
///
/// Chosen once when the region is entered, from the runtime's backend.
pub(crate) trait Scheduler<'r> {
    /// Take ownership of a spawned task. The task's group was already told
    /// about it and is joined by the caller, never by the scheduler.
    fn submit(&self, task: TaskRecord<'r>);
}

/// Sequential backend: runs each task inline, at spawn.
#[derive(Debug)]
pub(crate) struct InlineScheduler;

impl<'r> Scheduler<'r> for InlineScheduler {
    fn submit(&self, task: TaskRecord<'r>) {
        task.run();
    }
}

/// Explicit-synch backend: hands each task to the pool at once. Declared
/// accesses are not used for ordering.
#[derive(Debug)]
pub(crate) struct PoolScheduler<'a, 'r> {
    #[debug(skip)]
    pub(crate) scope: &'a Scope<'r>,
}

impl<'r> Scheduler<'r> for PoolScheduler<'_, 'r> {
    fn submit(&self, task: TaskRecord<'r>) {
        self.scope.spawn(move |_| task.run());
    }
}

/// Dataflow backend: a task reaches the pool once every conflicting task
/// spawned before it in the region has finished.
#[derive(Debug)]
pub(crate) struct DataflowScheduler<'a, 'r> {
    #[debug(skip)]
    scope: &'a Scope<'r>,
    tracker: Arc<DependencyTracker<TaskRecord<'r>>>,
}

impl<'a, 'r> DataflowScheduler<'a, 'r> {
    pub(crate) fn new(scope: &'a Scope<'r>) -> Self {
        Self {
            scope,
            tracker: Arc::new(DependencyTracker::new()),
        }
    }
}

impl<'r> Scheduler<'r> for DataflowScheduler<'_, 'r> {
    fn submit(&self, task: TaskRecord<'r>) {
        let id = task.handle.id();
        let access = task.access.clone();
        let registration = self.tracker.register(&access, task);
        trace!(
            task = id,
            predecessors = registration.predecessors,
            ready = registration.ready,
            "task registered"
        );
        if registration.ready {
            let tracker = self.tracker.clone();
            let node = registration.node;
            self.scope.spawn(move |_| run_ready(&tracker, vec![node]));
        }
    }
}

/// Run ready nodes and, transitively, the successors each one releases.
///
/// A single released successor continues on the current thread; several are
/// split in halves and joined, like independent roots.
fn run_ready<'r>(
    tracker: &DependencyTracker<TaskRecord<'r>>,
    mut nodes: Vec<Arc<Node<TaskRecord<'r>>>>,
) {
    loop {
        match nodes.len() {
            0 => return,
            1 => {
                let node = nodes.pop().expect("run_ready: [1]");
                nodes = run_node(tracker, &node);
            }
            _ => {
                let (left, right) = nodes.split_at_half();
                rayon::join(|| run_ready(tracker, left), || run_ready(tracker, right));
                return;
            }
        }
    }
}

fn run_node<'r>(
    tracker: &DependencyTracker<TaskRecord<'r>>,
    node: &Node<TaskRecord<'r>>,
) -> Vec<Arc<Node<TaskRecord<'r>>>> {
    if let Some(task) = node.take_payload() {
        task.run();
    }
    let released = tracker.complete(node);
    if !released.is_empty() {
        trace!(
            seq = node.seq(),
            released = released.len(),
            "successors released"
        );
    }
    released
}
