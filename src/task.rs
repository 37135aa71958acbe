use crate::{
    error::{BoxError, Failure},
    types::{BufferId, IndexSet, TaskId},
};
use core::{
    cell::RefCell,
    sync::atomic::{AtomicU8, Ordering},
};
use derive_more::Display;
use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

/// Kind of access a task declares on a buffer.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// The task only reads the buffer.
    #[display("read")]
    Read,
    /// The task writes the buffer.
    #[display("write")]
    Write,
}

/// Declared read-set and write-set of a task.
///
/// Under the dataflow backend two tasks of one region are ordered by spawn
/// order iff their declarations conflict on some buffer (write/write,
/// write/read or read/write). The other backends record the declaration
/// without using it for ordering.
///
/// A buffer both read and written is declared with [`Access::read_write`]
/// (or both [`Access::read`] and [`Access::write`]); it then counts as a
/// write.
#[must_use]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Access {
    reads: IndexSet<BufferId>,
    writes: IndexSet<BufferId>,
}

impl Access {
    /// Empty declaration: the task conflicts with nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a read of `buffer`.
    pub fn read(mut self, buffer: BufferId) -> Self {
        self.reads.insert(buffer);
        self
    }

    /// Declare a write of `buffer`.
    pub fn write(mut self, buffer: BufferId) -> Self {
        self.writes.insert(buffer);
        self
    }

    /// Declare a read and a write of `buffer`.
    pub fn read_write(self, buffer: BufferId) -> Self {
        self.read(buffer).write(buffer)
    }

    /// Declare reads of every buffer in `buffers`.
    pub fn reads(mut self, buffers: impl IntoIterator<Item = BufferId>) -> Self {
        self.reads.extend(buffers);
        self
    }

    /// Declare writes of every buffer in `buffers`.
    pub fn writes(mut self, buffers: impl IntoIterator<Item = BufferId>) -> Self {
        self.writes.extend(buffers);
        self
    }

    /// Buffers declared as read only.
    pub fn read_only(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.reads
            .iter()
            .copied()
            .filter(|buffer| !self.writes.contains(buffer))
    }

    /// Buffers declared as written.
    pub fn written(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.writes.iter().copied()
    }

    /// Strongest declared mode for `buffer`, if any.
    #[must_use]
    pub fn mode(&self, buffer: BufferId) -> Option<AccessMode> {
        if self.writes.contains(&buffer) {
            Some(AccessMode::Write)
        } else if self.reads.contains(&buffer) {
            Some(AccessMode::Read)
        } else {
            None
        }
    }

    /// `true` if `mode` on `buffer` is covered by the declaration.
    #[must_use]
    pub fn permits(&self, buffer: BufferId, mode: AccessMode) -> bool {
        match (self.mode(buffer), mode) {
            (Some(AccessMode::Write), _) | (Some(AccessMode::Read), AccessMode::Read) => true,
            (Some(AccessMode::Read), AccessMode::Write) | (None, _) => false,
        }
    }

    /// First buffer on which `self` and `other` conflict, if any.
    #[must_use]
    pub fn conflict_with(&self, other: &Self) -> Option<BufferId> {
        self.writes
            .iter()
            .find(|buffer| other.reads.contains(*buffer) || other.writes.contains(*buffer))
            .or_else(|| self.reads.iter().find(|buffer| other.writes.contains(*buffer)))
            .copied()
    }

    /// `true` if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }
}

/// Result type of loop and task bodies.
///
/// Implemented for `()` (infallible bodies) and `Result<(), E>` (fallible
/// bodies). A panicking body is a failure as well.
pub trait Outcome {
    /// Convert into the failure to report, if any.
    fn into_failure(self) -> Option<Failure>;
}

impl Outcome for () {
    #[inline]
    fn into_failure(self) -> Option<Failure> {
        None
    }
}

impl<E: Into<BoxError>> Outcome for Result<(), E> {
    fn into_failure(self) -> Option<Failure> {
        self.err().map(|err| Failure::Failed(err.into()))
    }
}

/// Run a body, turning an error result or a panic into a [`Failure`].
pub(crate) fn run_body<O: Outcome>(body: impl FnOnce() -> O) -> Option<Failure> {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(outcome) => outcome.into_failure(),
        Err(payload) => Some(Failure::from_panic(payload.as_ref())),
    }
}

const PENDING: u8 = 0;
const SUCCEEDED: u8 = 1;
const FAILED: u8 = 2;

/// Handle of a spawned task.
///
/// Retained by the enclosing task group until the group is joined; clones
/// may be kept by the caller to observe completion.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    status: Arc<AtomicU8>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            id,
            status: Arc::new(AtomicU8::new(PENDING)),
        }
    }

    /// Identifier of the task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// `true` once the task body has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status.load(Ordering::Acquire) != PENDING
    }

    /// `true` if the task finished with a failure.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.status.load(Ordering::Acquire) == FAILED
    }

    pub(crate) fn finish(&self, failed: bool) {
        let status = if failed { FAILED } else { SUCCEEDED };
        self.status.store(status, Ordering::Release);
    }
}

thread_local! {
    static CURRENT_ACCESS: RefCell<Option<Arc<Access>>> = const { RefCell::new(None) };
}

/// Makes a task's declaration visible to [`assert_declared`] while its body
/// runs on this thread. Restores the previous one on drop, since a thread
/// waiting on a join may run other task bodies.
pub(crate) struct DeclaredAccessScope {
    previous: Option<Arc<Access>>,
}

impl DeclaredAccessScope {
    pub(crate) fn enter(access: &Arc<Access>) -> Self {
        let previous = CURRENT_ACCESS.with_borrow_mut(|current| current.replace(access.clone()));
        Self { previous }
    }
}

impl Drop for DeclaredAccessScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_ACCESS.with_borrow_mut(|current| *current = previous);
    }
}

/// Check, in debug builds, that the running task declared `mode` on
/// `buffer`.
///
/// Kernels call this at the top of a task body to catch undeclared accesses,
/// which would otherwise silently break dataflow ordering. Outside a task body
/// and in release builds it does nothing.
///
/// # Panics
/// In debug builds, if the running task did not declare the access.
#[inline]
pub fn assert_declared(buffer: BufferId, mode: AccessMode) {
    #[cfg(debug_assertions)]
    CURRENT_ACCESS.with_borrow(|current| {
        if let Some(access) = current {
            assert!(
                access.permits(buffer, mode),
                "task {mode}s {buffer} without declaring it"
            );
        }
    });
    #[cfg(not(debug_assertions))]
    let _ = (buffer, mode);
}
