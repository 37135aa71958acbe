//! Portable task- and data-parallel execution layer.
//!
//! Numeric kernels describe *what* runs in parallel; this crate decides *how*
//! the work is cut and scheduled:
//! - A [`Splitter`] turns an iteration space of `n` indices (or an `m × n`
//!   matrix) into ordered, disjoint [`Range`]s (or [`Tile`]s) according to a
//!   [`CuttingStrategy`] and a [`StrategyParameter`].
//! - [`Runtime::parallel_for`] runs one body per range and waits for all of
//!   them.
//! - [`Runtime::task_region`] opens a [`TaskRegion`] in which tasks declaring
//!   their reads and writes ([`Access`]) are spawned, grouped into nested
//!   [`SyncGroup`]s, and joined when the group or region ends.
//! - Everything runs on one of three interchangeable backends
//!   ([`BackendKind`]): sequential, a thread pool ordered only by group joins,
//!   or a thread pool that also orders conflicting tasks by their declared
//!   accesses (dataflow).
//!
//! A program that is correct on the sequential backend and declares its
//! accesses truthfully produces the same results on every backend.
//!
//! Key modules:
//! - `splitter`: cutting strategies and the splitter.
//! - `runtime`: backends, the worker pool, parallel loops, task regions and
//!   synchronization groups.
//! - `task`: access declarations and task handles.
//! - `dataflow`: the dependency tracker ordering conflicting tasks.
//! - `config`: runtime configuration from code or the environment.
//!
//! Quick start:
//! ```
//! use paladin::{Access, BufferId, CuttingStrategy, StrategyParameter};
//!
//! let runtime = paladin::global()?;
//! let splitter = runtime.splitter(CuttingStrategy::Block, StrategyParameter::Threads)?;
//!
//! let b = vec![1u64; 64];
//! let c = vec![2u64; 64];
//! let mut a = vec![0u64; 64];
//! let (b, c) = (&b, &c);
//! let mut blocks = Vec::new();
//! let mut rest = a.as_mut_slice();
//! for range in splitter.split(64) {
//!     let (block, tail) = core::mem::take(&mut rest).split_at_mut(range.len());
//!     blocks.push((range, block));
//!     rest = tail;
//! }
//! runtime.task_region(|region| {
//!     for (range, block) in blocks {
//!         let access = Access::new()
//!             .reads([BufferId::of(b), BufferId::of(c)])
//!             .write(BufferId::of(&*block));
//!         region.spawn(access, move || {
//!             for (offset, x) in block.iter_mut().enumerate() {
//!                 *x = b[range.begin() + offset] + c[range.begin() + offset];
//!             }
//!         })?;
//!     }
//!     Ok::<(), paladin::Error>(())
//! })??;
//! assert!(a.iter().all(|&x| x == 3));
//! # Ok::<(), paladin::Error>(())
//! ```

/// Runtime configuration.
///
/// `Config` holds the worker count, backend and conflict checking switch; it
/// is built in code with [`Config::builder`] or read from `PALADIN_*`
/// environment variables with [`Config::from_env`].
pub mod config;
/// Debug-time detection of conflicting tasks running concurrently.
pub mod conflict;
/// Dependency tracking between tasks with declared accesses.
///
/// The dataflow backend registers every spawned task with a
/// [`DependencyTracker`](dataflow::DependencyTracker), which links it behind
/// the earlier tasks it conflicts with and releases it once they completed,
/// using a fence-protected counter per task.
pub mod dataflow;
/// Errors and body failures.
pub mod error;
/// Backends, the worker pool, parallel loops and task regions.
pub mod runtime;
/// Iteration space splitting.
pub mod splitter;
mod sync;
/// Access declarations and task handles.
pub mod task;
/// Ranges, tiles, buffer identities and hash container aliases.
pub mod types;
mod utils;

pub use crate::{
    config::{BackendKind, Config, ConfigBuilder},
    error::{Error, Failure, Result},
    runtime::{
        Runtime, SyncGroup, TaskRegion, active_backend, global, init, parallel_for, task_region,
    },
    splitter::{CuttingStrategy, Splitter, StrategyParameter},
    task::{Access, AccessMode, Outcome, TaskHandle, assert_declared},
    types::{BufferId, Range, TaskId, Tile},
};
