use crate::{
    error::{Error, Result},
    types::{Range, Tile},
};
use core::{fmt, num::NonZeroUsize, str::FromStr};
use derive_more::Display;

/// How an iteration space is sliced.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CuttingStrategy {
    /// Contiguous slices of the flattened space; a grid of blocks in 2-D.
    #[default]
    #[display("BLOCK")]
    Block,
    /// Row bands of an `m × n` space. Cuts the only dimension of a 1-D space.
    #[display("ROW")]
    Row,
    /// Column bands of an `m × n` space. Cuts the only dimension of a 1-D
    /// space.
    #[display("COLUMN")]
    Column,
    /// The whole space as one chunk, whatever the processor count.
    #[display("SINGLE")]
    Single,
}

impl FromStr for CuttingStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "row" => Ok(Self::Row),
            "column" | "col" => Ok(Self::Column),
            "single" => Ok(Self::Single),
            other => Err(Error::invalid_configuration(format!(
                "unknown cutting strategy {other:?}"
            ))),
        }
    }
}

/// How many chunks a [`CuttingStrategy`] produces.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StrategyParameter {
    /// One chunk per processor.
    #[default]
    #[display("THREADS")]
    Threads,
    /// Chunks of at least this many iteration units: `⌈size / grain⌉` chunks.
    #[display("GRAIN({_0})")]
    Grain(usize),
    /// Exactly this many chunks (capped by the space size).
    #[display("FIXED({_0})")]
    Fixed(usize),
}

impl FromStr for StrategyParameter {
    type Err = Error;

    /// Parses `threads`, `grain:<n>` or `fixed:<n>` (`=` is accepted in place
    /// of `:`).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        let (kind, value) = match s.split_once([':', '=']) {
            Some((kind, value)) => (kind, Some(value)),
            None => (s.as_str(), None),
        };
        let parse_value = || -> Result<usize> {
            let value = value.ok_or_else(|| {
                Error::invalid_configuration(format!("strategy parameter {kind:?} needs a value"))
            })?;
            value.trim().parse().map_err(|_| {
                Error::invalid_configuration(format!("invalid {kind} value {value:?}"))
            })
        };
        match kind {
            "threads" => Ok(Self::Threads),
            "grain" => Ok(Self::Grain(parse_value()?)),
            "fixed" => Ok(Self::Fixed(parse_value()?)),
            other => Err(Error::invalid_configuration(format!(
                "unknown strategy parameter {other:?}"
            ))),
        }
    }
}

/// Reusable partition generator.
///
/// Combines a processor count, a [`CuttingStrategy`] and a
/// [`StrategyParameter`]. The value is validated once by [`Splitter::new`];
/// afterwards every split is a pure function of the splitter and the space
/// size, so equal inputs always give equal partitions.
///
/// ```
/// use paladin::splitter::{CuttingStrategy, Splitter, StrategyParameter};
///
/// let splitter = Splitter::new(3, CuttingStrategy::Block, StrategyParameter::Threads)?;
/// let bounds: Vec<_> = splitter.split(10).iter().map(|r| (r.begin(), r.end())).collect();
/// assert_eq!(bounds, [(0, 4), (4, 7), (7, 10)]);
/// # Ok::<(), paladin::Error>(())
/// ```
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Splitter {
    processor_count: NonZeroUsize,
    strategy: CuttingStrategy,
    parameter: StrategyParameter,
}

impl Splitter {
    /// Validate and build a splitter.
    ///
    /// # Errors
    /// [`Error::InvalidConfiguration`] if `processor_count` is zero or the
    /// grain / fixed value is zero. Values are never clamped.
    pub fn new(
        processor_count: usize,
        strategy: CuttingStrategy,
        parameter: StrategyParameter,
    ) -> Result<Self> {
        let processor_count = NonZeroUsize::new(processor_count).ok_or_else(|| {
            Error::invalid_configuration("processor count must be at least 1")
        })?;
        match parameter {
            StrategyParameter::Grain(0) => {
                return Err(Error::invalid_configuration("grain size must be at least 1"));
            }
            StrategyParameter::Fixed(0) => {
                return Err(Error::invalid_configuration(
                    "fixed chunk count must be at least 1",
                ));
            }
            StrategyParameter::Threads
            | StrategyParameter::Grain(_)
            | StrategyParameter::Fixed(_) => {}
        }
        Ok(Self {
            processor_count,
            strategy,
            parameter,
        })
    }

    /// Splitter that never cuts: one chunk spanning the whole space.
    pub const fn single() -> Self {
        Self {
            processor_count: NonZeroUsize::MIN,
            strategy: CuttingStrategy::Single,
            parameter: StrategyParameter::Threads,
        }
    }

    /// Processor count the splitter was built for.
    #[must_use]
    pub const fn processor_count(&self) -> usize {
        self.processor_count.get()
    }

    /// Cutting strategy.
    #[must_use]
    pub const fn strategy(&self) -> CuttingStrategy {
        self.strategy
    }

    /// Strategy parameter.
    #[must_use]
    pub const fn parameter(&self) -> StrategyParameter {
        self.parameter
    }

    /// Chunk count requested by the parameter for an extent of `extent`
    /// units, before capping.
    fn target(&self, extent: usize) -> usize {
        match self.parameter {
            StrategyParameter::Threads => self.processor_count.get(),
            StrategyParameter::Grain(grain) => extent.div_ceil(grain),
            StrategyParameter::Fixed(count) => count,
        }
    }

    /// Number of ranges [`Splitter::split`] produces for `size`.
    #[must_use]
    pub fn chunk_count(&self, size: usize) -> usize {
        match (size, self.strategy) {
            (0, _) => 0,
            (_, CuttingStrategy::Single) => 1,
            _ => self.target(size).clamp(1, size),
        }
    }

    /// Partition `[0, size)` into ascending, disjoint, nearly-equal ranges.
    ///
    /// Sizes differ by at most one; the first `size % chunks` ranges are the
    /// larger ones. `size == 0` gives no range.
    pub fn split(&self, size: usize) -> Vec<Range> {
        even_ranges(size, self.chunk_count(size)).collect()
    }

    /// Partition an `rows × cols` space into row-major ordered tiles.
    ///
    /// `Row` cuts rows into bands spanning every column, `Column` cuts
    /// columns into bands spanning every row, `Block` cuts a grid of
    /// `⌊√t⌋ × ⌊t / ⌊√t⌋⌋` tiles for a target of `t` chunks, and `Single`
    /// yields the whole space. An empty dimension gives no tile.
    pub fn split_2d(&self, rows: usize, cols: usize) -> Vec<Tile> {
        if rows == 0 || cols == 0 {
            return Vec::new();
        }
        let (row_chunks, col_chunks) = match self.strategy {
            CuttingStrategy::Single => (1, 1),
            CuttingStrategy::Row => (self.chunk_count(rows), 1),
            CuttingStrategy::Column => (1, self.chunk_count(cols)),
            CuttingStrategy::Block => {
                let target = self.target(rows.saturating_mul(cols)).max(1);
                let grid_rows = target.isqrt();
                let grid_cols = target / grid_rows;
                (grid_rows.min(rows), grid_cols.min(cols))
            }
        };
        let col_ranges: Vec<_> = even_ranges(cols, col_chunks).collect();
        even_ranges(rows, row_chunks)
            .flat_map(|rows| col_ranges.iter().map(move |&cols| Tile { rows, cols }))
            .collect()
    }
}

impl Default for Splitter {
    fn default() -> Self {
        Self::single()
    }
}

impl fmt::Display for Splitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.processor_count, self.strategy, self.parameter
        )
    }
}

/// `chunks` contiguous ranges covering `[0, size)`, the first `size % chunks`
/// one unit longer than the rest.
fn even_ranges(size: usize, chunks: usize) -> impl Iterator<Item = Range> {
    let (base, remainder) = match chunks {
        0 => (0, 0),
        _ => (size / chunks, size % chunks),
    };
    (0..chunks).scan(0, move |begin, idx| {
        let len = base + usize::from(idx < remainder);
        let range = Range::new(*begin, *begin + len);
        *begin += len;
        Some(range)
    })
}
