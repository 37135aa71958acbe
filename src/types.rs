use core::{fmt, num::NonZeroU64, ops};
use indexmap::IndexSet as _IndexSet;
use rustc_hash::FxBuildHasher;
use std::collections::HashMap as _HashMap;

/// Half-open interval `[begin, end)` of iteration indices.
///
/// Produced by [`Splitter`](crate::splitter::Splitter) and handed to loop and
/// task bodies. A `Range` is immutable once produced; the ranges of one split
/// are pairwise disjoint, which is the only thing that makes concurrent
/// writes through them sound.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Range {
    begin: usize,
    end: usize,
}

impl Range {
    /// Create `[begin, end)`.
    ///
    /// # Panics
    /// If `begin > end`.
    pub const fn new(begin: usize, end: usize) -> Self {
        assert!(begin <= end, "Range::new: begin > end");
        Self { begin, end }
    }

    /// First index of the range.
    #[must_use]
    pub const fn begin(&self) -> usize {
        self.begin
    }

    /// One past the last index of the range.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.end
    }

    /// Number of indices covered.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end - self.begin
    }

    /// `true` if the range covers no index.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// `true` if `index` lies in `[begin, end)`.
    #[must_use]
    pub const fn contains(&self, index: usize) -> bool {
        self.begin <= index && index < self.end
    }

    /// The covered indices as a standard library range.
    pub const fn indices(&self) -> ops::Range<usize> {
        self.begin..self.end
    }
}

impl IntoIterator for Range {
    type Item = usize;
    type IntoIter = ops::Range<usize>;

    fn into_iter(self) -> Self::IntoIter {
        self.indices()
    }
}

impl From<Range> for ops::Range<usize> {
    fn from(range: Range) -> Self {
        range.indices()
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// Rectangular block of an `m × n` iteration space.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
    /// Row indices of the block.
    pub rows: Range,
    /// Column indices of the block.
    pub cols: Range,
}

impl Tile {
    /// Number of `(row, column)` cells in the block.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows.len() * self.cols.len()
    }

    /// `true` if the block has no cell.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.cols.is_empty()
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {}", self.rows, self.cols)
    }
}

/// Opaque identity of a caller-owned buffer.
///
/// The scheduler only compares identities to derive dependency edges; it
/// never reads, copies, or owns the data behind them. Two declarations
/// conflict iff their identities are equal, so a kernel that wants
/// finer-grained tracking (e.g. per block of a matrix) declares one identity
/// per block.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(BufferKey);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum BufferKey {
    Address(usize),
    Key(u64),
}

impl BufferId {
    /// Identity derived from the start address of `buffer`.
    ///
    /// Sub-slices starting at different addresses are distinct identities.
    pub fn of<T: ?Sized>(buffer: &T) -> Self {
        Self(BufferKey::Address(
            core::ptr::from_ref(buffer).cast::<()>().addr(),
        ))
    }

    /// Identity from an explicit caller-chosen key. Never equal to an
    /// address-derived identity.
    pub const fn from_key(key: u64) -> Self {
        Self(BufferKey::Key(key))
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            BufferKey::Address(addr) => write!(f, "buf@{addr:#x}"),
            BufferKey::Key(key) => write!(f, "buf#{key}"),
        }
    }
}

/// Identifier of a spawned task, unique within its runtime.
pub type TaskId = NonZeroU64;

pub(crate) type HashMap<K, V> = _HashMap<K, V, FxBuildHasher>;
/// `IndexSet` type with fast hasher.
pub type IndexSet<T> = _IndexSet<T, FxBuildHasher>;
