use crate::{
    sync::{Arc, AtomicUsize, Mutex, Ordering, fence, lock},
    task::Access,
    types::{BufferId, HashMap},
};
use derive_more::Debug;

/// Dependency tracker of the dataflow backend.
///
/// Derives edges from declared accesses in registration order: a node depends
/// on the last writer of every buffer it reads, and on the last writer and
/// all readers since that write of every buffer it writes. Edges to nodes
/// that already finished are dropped at registration.
///
/// Readiness is driven by a per-node counter of unfinished predecessors
/// (plus one held by the registering thread until all edges are in place).
/// The thread whose decrement brings the counter to zero owns the node and
/// must run it; every node is handed out exactly once, either by
/// [`DependencyTracker::register`] or by [`DependencyTracker::complete`].
#[derive(Debug)]
pub struct DependencyTracker<T> {
    #[debug(skip)]
    state: Mutex<TrackerState<T>>,
}

struct TrackerState<T> {
    next_seq: u64,
    buffers: HashMap<BufferId, BufferState<T>>,
}

struct BufferState<T> {
    last_writer: Option<Arc<Node<T>>>,
    /// Readers registered since `last_writer`.
    readers: Vec<Arc<Node<T>>>,
}

impl<T> Default for BufferState<T> {
    fn default() -> Self {
        Self {
            last_writer: None,
            readers: Vec::new(),
        }
    }
}

/// A registered unit of work and its scheduling state.
#[derive(Debug)]
pub struct Node<T> {
    seq: u64,
    /// Predecessors that haven't finished yet, plus the registration guard.
    preds_left: AtomicUsize,
    #[debug(skip)]
    links: Mutex<Links<T>>,
    #[debug(skip)]
    payload: Mutex<Option<T>>,
}

struct Links<T> {
    finished: bool,
    successors: Vec<Arc<Node<T>>>,
}

/// Result of [`DependencyTracker::register`].
#[derive(Debug)]
#[must_use]
pub struct Registration<T> {
    /// The registered node.
    pub node: Arc<Node<T>>,
    /// Number of unfinished predecessors the node was linked to.
    pub predecessors: usize,
    /// `true` if the node may run immediately; the caller then owns it.
    pub ready: bool,
}

impl<T> Node<T> {
    /// Registration order of the node, starting at 0.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Take the payload out of the node. Returns `None` if already taken.
    pub fn take_payload(&self) -> Option<T> {
        lock(&self.payload).take()
    }

    /// `true` once the node was passed to [`DependencyTracker::complete`].
    #[must_use]
    pub fn is_finished(&self) -> bool {
        lock(&self.links).finished
    }
}

impl<T> Default for DependencyTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DependencyTracker<T> {
    /// Empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                next_seq: 0,
                buffers: HashMap::default(),
            }),
        }
    }

    /// Register a unit with its declared access and link it after every
    /// conflicting earlier unit that hasn't finished.
    pub fn register(&self, access: &Access, payload: T) -> Registration<T> {
        let mut state = lock(&self.state);
        let TrackerState { next_seq, buffers } = &mut *state;
        let node = Arc::new(Node {
            seq: *next_seq,
            preds_left: AtomicUsize::new(1),
            links: Mutex::new(Links {
                finished: false,
                successors: Vec::new(),
            }),
            payload: Mutex::new(Some(payload)),
        });
        *next_seq += 1;

        let mut preds = Vec::new();
        for buffer in access.read_only() {
            let entry = buffers.entry(buffer).or_default();
            preds.extend(entry.last_writer.clone());
            entry.readers.retain(|reader| !reader.is_finished());
            entry.readers.push(node.clone());
        }
        for buffer in access.written() {
            let entry = buffers.entry(buffer).or_default();
            preds.extend(entry.last_writer.take());
            preds.append(&mut entry.readers);
            entry.last_writer = Some(node.clone());
        }
        preds.sort_unstable_by_key(|pred| pred.seq);
        preds.dedup_by_key(|pred| pred.seq);

        let mut predecessors = 0;
        for pred in preds {
            let mut links = lock(&pred.links);
            if !links.finished {
                // Counted under the predecessor's lock, so its `complete` sees
                // both the increment and the new successor or neither.
                node.preds_left.fetch_add(1, Ordering::Relaxed);
                links.successors.push(node.clone());
                predecessors += 1;
            }
        }
        drop(state);

        let ready = node.preds_left.fetch_sub(1, Ordering::AcqRel) == 1;
        Registration {
            node,
            predecessors,
            ready,
        }
    }

    /// Mark `node` finished and return the successors it released. The
    /// caller owns the returned nodes and must run them.
    pub fn complete(&self, node: &Node<T>) -> Vec<Arc<Node<T>>> {
        let successors = {
            let mut links = lock(&node.links);
            debug_assert!(!links.finished, "DependencyTracker::complete: [1]");
            links.finished = true;
            core::mem::take(&mut links.successors)
        };
        if successors.is_empty() {
            return successors;
        }
        fence(Ordering::Release);
        let ready: Vec<_> = successors
            .into_iter()
            .filter(|succ| succ.preds_left.fetch_sub(1, Ordering::Relaxed) == 1)
            .collect();
        if !ready.is_empty() {
            fence(Ordering::Acquire);
        }
        ready
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    const X: BufferId = BufferId::from_key(1);
    const Y: BufferId = BufferId::from_key(2);

    #[test]
    fn independent_units_are_ready_at_once() {
        let tracker = DependencyTracker::new();
        let a = tracker.register(&Access::new().write(X), "a");
        let b = tracker.register(&Access::new().write(Y), "b");
        let c = tracker.register(&Access::new(), "c");
        assert!(a.ready && b.ready && c.ready);
        assert_eq!(a.node.seq(), 0);
        assert_eq!(c.node.seq(), 2);
    }

    #[test]
    fn readers_wait_for_writer_and_writer_waits_for_readers() {
        let tracker = DependencyTracker::new();
        let w1 = tracker.register(&Access::new().write(X), 1);
        let r1 = tracker.register(&Access::new().read(X), 2);
        let r2 = tracker.register(&Access::new().read(X), 3);
        let w2 = tracker.register(&Access::new().write(X), 4);
        assert!(w1.ready);
        assert!(!r1.ready && !r2.ready && !w2.ready);
        assert_eq!(w2.predecessors, 3);

        let released = tracker.complete(&w1.node);
        let seqs: Vec<_> = released.iter().map(|n| n.seq()).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert!(tracker.complete(&r1.node).is_empty());
        let released = tracker.complete(&r2.node);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].take_payload(), Some(4));
        assert_eq!(released[0].take_payload(), None);
    }

    #[test]
    fn finished_predecessors_are_not_linked() {
        let tracker = DependencyTracker::new();
        let w = tracker.register(&Access::new().write(X), ());
        assert!(tracker.complete(&w.node).is_empty());
        let r = tracker.register(&Access::new().read(X).write(Y), ());
        assert!(r.ready);
        assert_eq!(r.predecessors, 0);
    }

    #[test]
    fn read_write_declarations_count_as_writes() {
        let tracker = DependencyTracker::new();
        let a = tracker.register(&Access::new().read_write(X), ());
        let b = tracker.register(&Access::new().read_write(X), ());
        assert!(a.ready);
        assert!(!b.ready);
        assert_eq!(b.predecessors, 1);
    }

    #[test]
    fn duplicate_edges_are_collapsed() {
        let tracker = DependencyTracker::new();
        let a = tracker.register(&Access::new().write(X).write(Y), ());
        let b = tracker.register(&Access::new().read(X).read(Y), ());
        assert_eq!(b.predecessors, 1);
        let released = tracker.complete(&a.node);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].seq(), b.node.seq());
    }
}
