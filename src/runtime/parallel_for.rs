use crate::{
    config::BackendKind,
    error::{Error, Failure, Result},
    runtime::Runtime,
    splitter::Splitter,
    task::{Outcome, run_body},
    types::{Range, Tile},
    utils::SplitAtHalf,
};
use tracing::{trace, warn};

impl Runtime {
    /// Run `body` once per range of `splitter.split(size)` and wait for all
    /// of them.
    ///
    /// Ranges are independent units: under the sequential backend they run in
    /// ascending order on the caller, otherwise concurrently on the pool. A
    /// failing unit does not stop its siblings. Once all have returned, the
    /// failure of the lowest failing range is reported with the others
    /// attached as suppressed.
    ///
    /// Bodies may issue nested loops and task regions on the same runtime.
    ///
    /// # Errors
    /// - [`Error::ThreadPool`] if the pool could not be started.
    /// - [`Error::PropagatedFailure`] if a body returned an error or panicked.
    ///
    /// # Example
    /// ```
    /// use paladin::{BackendKind, Config, CuttingStrategy, Runtime, StrategyParameter};
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    ///
    /// let runtime = Runtime::new(Config::builder().backend(BackendKind::ExplicitSynch).build()?)?;
    /// let splitter = runtime.splitter(CuttingStrategy::Block, StrategyParameter::Grain(16))?;
    /// let sum = AtomicUsize::new(0);
    /// runtime.parallel_for(&splitter, 100, |range| {
    ///     sum.fetch_add(range.into_iter().sum(), Ordering::Relaxed);
    /// })?;
    /// assert_eq!(sum.into_inner(), 4950);
    /// # Ok::<(), paladin::Error>(())
    /// ```
    pub fn parallel_for<F, O>(&self, splitter: &Splitter, size: usize, body: F) -> Result<()>
    where
        F: Fn(Range) -> O + Sync,
        O: Outcome,
    {
        let ranges = splitter.split(size);
        trace!(%splitter, size, units = ranges.len(), "parallel for");
        self.dispatch(ranges, |range| run_body(|| body(range)))
    }

    /// Run `body` once per index of `[0, size)`, with indices grouped into the
    /// ranges of `splitter.split(size)`.
    ///
    /// Within a range, indices run in ascending order and the first failing
    /// index ends its range.
    ///
    /// # Errors
    /// See [`Runtime::parallel_for`].
    pub fn parallel_for_each<F, O>(&self, splitter: &Splitter, size: usize, body: F) -> Result<()>
    where
        F: Fn(usize) -> O + Sync,
        O: Outcome,
    {
        let ranges = splitter.split(size);
        trace!(%splitter, size, units = ranges.len(), "parallel for each");
        self.dispatch(ranges, |range| {
            let mut failure = None;
            let panicked = run_body(|| {
                failure = range
                    .into_iter()
                    .find_map(|index| body(index).into_failure());
            });
            panicked.or(failure)
        })
    }

    /// Run `body` once per tile of `splitter.split_2d(rows, cols)`.
    ///
    /// # Errors
    /// See [`Runtime::parallel_for`].
    pub fn parallel_for_2d<F, O>(
        &self,
        splitter: &Splitter,
        rows: usize,
        cols: usize,
        body: F,
    ) -> Result<()>
    where
        F: Fn(Tile) -> O + Sync,
        O: Outcome,
    {
        let tiles = splitter.split_2d(rows, cols);
        trace!(%splitter, rows, cols, units = tiles.len(), "parallel for 2d");
        self.dispatch(tiles, |tile| run_body(|| body(tile)))
    }

    /// Run `body` over blocks of rows of the row-major matrix `data`, whose
    /// rows are `row_len` elements long.
    ///
    /// The rows are cut by `splitter.split(rows)`; each body receives its row
    /// range and exclusive access to the elements of those rows.
    ///
    /// # Errors
    /// - [`Error::InvalidConfiguration`] if `row_len` is zero or does not
    ///   divide `data.len()`.
    /// - See [`Runtime::parallel_for`].
    pub fn parallel_for_rows<T, F, O>(
        &self,
        splitter: &Splitter,
        data: &mut [T],
        row_len: usize,
        body: F,
    ) -> Result<()>
    where
        T: Send,
        F: Fn(Range, &mut [T]) -> O + Sync,
        O: Outcome,
    {
        if row_len == 0 || !data.len().is_multiple_of(row_len) {
            return Err(Error::invalid_configuration(format!(
                "{} elements do not form rows of {row_len}",
                data.len()
            )));
        }
        let ranges = splitter.split(data.len() / row_len);
        trace!(%splitter, rows = data.len() / row_len, units = ranges.len(), "parallel for rows");
        let mut rest = data;
        let mut units = Vec::with_capacity(ranges.len());
        for range in ranges {
            let (block, tail) = core::mem::take(&mut rest).split_at_mut(range.len() * row_len);
            units.push((range, block));
            rest = tail;
        }
        self.dispatch(units, |(range, block)| run_body(|| body(range, block)))
    }

    /// Run every unit on the active backend and fold the failures.
    fn dispatch<U, F>(&self, units: Vec<U>, run: F) -> Result<()>
    where
        U: Send,
        F: Fn(U) -> Option<Failure> + Sync,
    {
        let count = units.len();
        let units: Vec<_> = units.into_iter().enumerate().collect();
        let mut failures = match self.backend() {
            BackendKind::Sequential => units
                .into_iter()
                .filter_map(|(index, unit)| run(unit).map(|failure| (index, failure)))
                .collect(),
            BackendKind::ExplicitSynch | BackendKind::Dataflow => {
                self.pool()?.install(|| join_units(units, &run))
            }
        };
        if failures.is_empty() {
            return Ok(());
        }
        warn!(failed = failures.len(), units = count, "parallel for units failed");
        failures.sort_unstable_by_key(|(index, _)| *index);
        match Error::from_failures(failures.into_iter().map(|(_, failure)| failure)) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Run indexed units, halving them until one is left.
fn join_units<U, F>(mut units: Vec<(usize, U)>, run: &F) -> Vec<(usize, Failure)>
where
    U: Send,
    F: Fn(U) -> Option<Failure> + Sync,
{
    match units.len() {
        0 => return Vec::new(),
        1 => {
            let (index, unit) = units.pop().expect("join_units: [1]");
            return run(unit).map(|failure| (index, failure)).into_iter().collect();
        }
        _ => {}
    }
    let (left, right) = units.split_at_half();
    let (mut failures, right) = rayon::join(|| join_units(left, run), || join_units(right, run));
    failures.extend(right);
    failures
}
