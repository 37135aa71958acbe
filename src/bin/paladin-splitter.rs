//! paladin-splitter: element-wise modular addition of two square matrices,
//! cut by one of the ten splitting strategies and run data- or
//! task-parallel, then checked against a serial loop.
//!
//! Prints `PASS` or `FAIL`, followed by the timings, the strategy label and
//! the kind of parallelism used.

use clap::{ArgAction, Parser};
use paladin::{
    Access, BackendKind, BufferId, Config, CuttingStrategy, Range, Runtime, Splitter,
    StrategyParameter,
};
use std::{
    process::ExitCode,
    time::{Duration, Instant},
};
use tracing::{error, info};

// ── CLI ─────────────────────────────────────────────────────────────

/// Matrix addition benchmark of the splitting strategies.
#[derive(Parser, Debug)]
#[command(name = "paladin-splitter", version, about)]
struct Cli {
    /// Dimension of the matrices.
    #[arg(short = 'n', default_value_t = 2000)]
    dimension: usize,

    /// Number of timed repetitions.
    #[arg(short = 'i', default_value_t = 3)]
    iterations: usize,

    /// Number of processors; defaults to `PALADIN_NUM_THREADS` or the
    /// available parallelism.
    #[arg(short = 't')]
    threads: Option<usize>,

    /// Strategy: 1-3 BLOCK, 4-6 ROW, 7-9 COLUMN with THREADS, GRAIN, FIXED
    /// in turn; 10 SINGLE.
    #[arg(short = 's', default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=10))]
    strategy: u8,

    /// Data parallelism (`true`) or task parallelism (`false`).
    #[arg(short = 'd', default_value_t = true, action = ArgAction::Set)]
    data_parallel: bool,

    /// Grain of the GRAIN strategies.
    #[arg(long, default_value_t = 64)]
    grain: usize,

    /// Chunk count of the FIXED strategies.
    #[arg(long, default_value_t = 16)]
    fixed: usize,

    /// Prime modulus of the field.
    #[arg(short = 'q', default_value_t = 131_071, value_parser = clap::value_parser!(u64).range(2..))]
    modulus: u64,

    /// Backend; overrides `PALADIN_BACKEND`.
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Seed of the matrix entries.
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,
}

impl Cli {
    fn cutting(&self) -> (CuttingStrategy, StrategyParameter) {
        let index = self.strategy - 1;
        let strategy = match index / 3 {
            0 => CuttingStrategy::Block,
            1 => CuttingStrategy::Row,
            2 => CuttingStrategy::Column,
            _ => CuttingStrategy::Single,
        };
        let parameter = match index % 3 {
            0 => StrategyParameter::Threads,
            1 => StrategyParameter::Grain(self.grain),
            _ => StrategyParameter::Fixed(self.fixed),
        };
        (strategy, parameter)
    }
}

// ── Field ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Field {
    modulus: u64,
    seed: u64,
}

impl Field {
    fn add(self, x: u64, y: u64) -> u64 {
        (x + y) % self.modulus
    }

    /// Deterministic pseudo-random element for slot `index` of matrix
    /// `matrix`.
    fn random(self, matrix: u64, index: usize) -> u64 {
        let mut z = self
            .seed
            .wrapping_add(matrix.wrapping_mul(0x9e37_79b9_7f4a_7c15))
            .wrapping_add((index as u64).wrapping_mul(0xbf58_476d_1ce4_e5b9));
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        (z ^ (z >> 31)) % self.modulus
    }
}

// ── Benchmark ───────────────────────────────────────────────────────

struct Matrices {
    a: Vec<u64>,
    b: Vec<u64>,
    c: Vec<u64>,
}

/// Cut `data` into the blocks of `ranges`, which must cover it in order.
fn blocks<'d, T>(data: &'d mut [T], ranges: &[Range]) -> Vec<&'d mut [T]> {
    let mut rest = data;
    ranges
        .iter()
        .map(|range| {
            let (block, tail) = core::mem::take(&mut rest).split_at_mut(range.len());
            rest = tail;
            block
        })
        .collect()
}

fn fill(field: Field, matrix: u64, offset: usize, block: &mut [u64]) {
    for (k, x) in block.iter_mut().enumerate() {
        *x = field.random(matrix, offset + k);
    }
}

fn initialize(
    runtime: &Runtime,
    splitter: &Splitter,
    field: Field,
    n: usize,
    data_parallel: bool,
) -> paladin::Result<Matrices> {
    let mut m = Matrices {
        a: vec![0; n * n],
        b: vec![0; n * n],
        c: vec![0; n * n],
    };
    if data_parallel {
        for (matrix, data) in [&mut m.a, &mut m.b, &mut m.c].into_iter().enumerate() {
            runtime.parallel_for_rows(splitter, data, n, |rows, block| {
                fill(field, matrix as u64, rows.begin() * n, block);
            })?;
        }
    } else {
        let ranges = splitter.split(n * n);
        let Matrices { a, b, c } = &mut m;
        let (a, b, c) = (blocks(a, &ranges), blocks(b, &ranges), blocks(c, &ranges));
        runtime.task_region(|region| {
            region.sync_group(|region| {
                for (((range, a), b), c) in ranges.iter().zip(a).zip(b).zip(c) {
                    let offset = range.begin();
                    for (matrix, block) in [a, b, c].into_iter().enumerate() {
                        let access = Access::new().write(BufferId::of(&*block));
                        region.spawn(access, move || fill(field, matrix as u64, offset, block))?;
                    }
                }
                Ok::<(), paladin::Error>(())
            })?
        })??;
    }
    Ok(m)
}

/// One parallel `A = B + C`.
fn add(
    runtime: &Runtime,
    splitter: &Splitter,
    field: Field,
    n: usize,
    data_parallel: bool,
    m: &mut Matrices,
) -> paladin::Result<()> {
    let Matrices { a, b, c } = m;
    let (b, c) = (b.as_slice(), c.as_slice());
    if data_parallel {
        return runtime.parallel_for_rows(splitter, a, n, |rows, block| {
            let offset = rows.begin() * n;
            for (k, x) in block.iter_mut().enumerate() {
                *x = field.add(b[offset + k], c[offset + k]);
            }
        });
    }
    let ranges = splitter.split(n * n);
    let inputs = [BufferId::of(b), BufferId::of(c)];
    let outputs = blocks(a, &ranges);
    runtime.task_region(|region| {
        for (range, block) in ranges.iter().copied().zip(outputs) {
            let access = Access::new().reads(inputs).write(BufferId::of(&*block));
            region.spawn(access, move || {
                for (k, x) in block.iter_mut().enumerate() {
                    let i = range.begin() + k;
                    *x = field.add(b[i], c[i]);
                }
            })?;
        }
        Ok::<(), paladin::Error>(())
    })?
}

fn run(cli: &Cli) -> paladin::Result<bool> {
    let mut config = Config::from_env()?;
    if let Some(threads) = cli.threads {
        config.num_threads = threads;
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    let runtime = paladin::init(config)?;
    let (strategy, parameter) = cli.cutting();
    let splitter = runtime.splitter(strategy, parameter)?;
    info!(%splitter, backend = %runtime.backend(), "running");

    let n = cli.dimension;
    let field = Field {
        modulus: cli.modulus,
        seed: cli.seed,
    };
    let mut m = initialize(runtime, &splitter, field, n, cli.data_parallel)?;

    let mut times = Vec::with_capacity(cli.iterations);
    for it in 0..=cli.iterations {
        let start = Instant::now();
        add(runtime, &splitter, field, n, cli.data_parallel, &mut m)?;
        // The first run warms the pool up and is not timed.
        if it > 0 {
            times.push(start.elapsed());
        }
    }
    times.sort_unstable();
    let par_time = times.get(times.len() / 2).copied().unwrap_or(Duration::ZERO);

    let start = Instant::now();
    let expected: Vec<u64> = m
        .b
        .iter()
        .zip(&m.c)
        .map(|(&x, &y)| field.add(x, y))
        .collect();
    let seq_time = start.elapsed();

    let mut pass = true;
    for (index, (&seq, &par)) in expected.iter().zip(&m.a).enumerate() {
        if seq != par {
            let (i, j) = (index / n, index % n);
            println!(" Seq[{i},{j}] = {seq} Par[{i},{j}] = {par}");
            pass = false;
        }
    }
    println!("{}", if pass { "PASS" } else { "FAIL" });

    let parallelism = if cli.data_parallel {
        "Data parallelism is used!".to_owned()
    } else {
        let synch = match runtime.backend() {
            BackendKind::Dataflow => "dataflow",
            BackendKind::ExplicitSynch | BackendKind::Sequential => "explicit",
        };
        format!("TASK parallelism is used with {synch} synch!")
    };
    println!(
        "m: {n} n: {n} SeqTime: {:.6} ParTime: {:.6} Strategy:{splitter} Backend: {} {parallelism}",
        seq_time.as_secs_f64(),
        par_time.as_secs_f64(),
        runtime.backend(),
    );
    Ok(pass)
}

// ── main ────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(%err, "paladin-splitter failed");
            ExitCode::FAILURE
        }
    }
}
