mod group;
mod parallel_for;
mod region;
mod scheduler;

pub use crate::runtime::region::{SyncGroup, TaskRegion};
use crate::{
    config::{BackendKind, Config},
    conflict::ConflictChecker,
    error::{Error, Result},
    runtime::scheduler::{DataflowScheduler, InlineScheduler, PoolScheduler},
    splitter::{CuttingStrategy, Splitter, StrategyParameter},
    task::Outcome,
    types::{Range, TaskId},
};
use core::sync::atomic::{AtomicU64, Ordering};
use derive_more::Debug;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::{Arc, OnceLock};
use tracing::info;

/// Execution context: a backend and its worker pool.
///
/// Loops and task regions issued through one runtime share its pool, nested
/// ones included. The pool is started on first parallel use and lives as long
/// as the runtime. The sequential backend never starts one.
///
/// Most programs use the process-wide runtime through [`init`], [`global`]
/// and the free functions; separate runtimes are useful to compare backends
/// within one process.
#[derive(Debug)]
pub struct Runtime {
    config: Config,
    #[debug(skip)]
    pool: OnceLock<ThreadPool>,
    checker: Option<Arc<ConflictChecker>>,
    next_task_id: AtomicU64,
}

impl Runtime {
    /// # Errors
    /// [`Error::InvalidConfiguration`] if `config` is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        info!(
            backend = %config.backend,
            threads = config.num_threads,
            check_conflicts = config.check_conflicts,
            "runtime created"
        );
        Ok(Self {
            checker: config
                .check_conflicts
                .then(|| Arc::new(ConflictChecker::new())),
            config,
            pool: OnceLock::new(),
            next_task_id: AtomicU64::new(0),
        })
    }

    /// Runtime configured from the environment, see [`Config::from_env`].
    ///
    /// # Errors
    /// [`Error::InvalidConfiguration`] if a variable holds an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::new(Config::from_env()?)
    }

    /// Configuration the runtime was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Active backend.
    #[must_use]
    pub fn backend(&self) -> BackendKind {
        self.config.backend
    }

    /// Worker count of the pool.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.config.num_threads
    }

    /// Splitter over this runtime's worker count.
    ///
    /// # Errors
    /// See [`Splitter::new`].
    pub fn splitter(
        &self,
        strategy: CuttingStrategy,
        parameter: StrategyParameter,
    ) -> Result<Splitter> {
        self.config.splitter(strategy, parameter)
    }

    /// Conflicting task pairs seen running at the same time, or `None` when
    /// the conflict checker is disabled.
    #[must_use]
    pub fn observed_conflicts(&self) -> Option<usize> {
        self.checker.as_deref().map(ConflictChecker::observed)
    }

    pub(crate) fn conflict_checker(&self) -> Option<Arc<ConflictChecker>> {
        self.checker.clone()
    }

    pub(crate) fn next_task_id(&self) -> TaskId {
        TaskId::MIN.saturating_add(self.next_task_id.fetch_add(1, Ordering::Relaxed))
    }

    /// The worker pool, started on first call.
    pub(crate) fn pool(&self) -> Result<&ThreadPool> {
        if let Some(pool) = self.pool.get() {
            return Ok(pool);
        }
        let prefix = self.config.thread_name.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.num_threads)
            .thread_name(move |index| format!("{prefix}-{index}"))
            .build()?;
        // A concurrent first call may have won; its pool is kept, ours dropped.
        let pool = self.pool.get_or_init(|| {
            info!(threads = self.config.num_threads, "worker pool started");
            pool
        });
        Ok(pool)
    }

    /// Enter a task region and run `op` in it.
    ///
    /// `op` spawns tasks and opens synchronization groups through the region.
    /// When it returns, every task still running is joined, whatever the
    /// backend, and the first failure of a task not yet reported by a group
    /// join is returned.
    ///
    /// # Errors
    /// - [`Error::ThreadPool`] if the pool could not be started.
    /// - [`Error::PropagatedFailure`] if a task joined at region exit failed.
    ///
    /// # Example
    /// ```
    /// use paladin::{Access, BackendKind, BufferId, Config, Runtime};
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    ///
    /// let runtime = Runtime::new(
    ///     Config::builder().backend(BackendKind::Dataflow).num_threads(2).build()?,
    /// )?;
    /// let total = AtomicUsize::new(0);
    /// runtime.task_region(|region| {
    ///     for _ in 0..4 {
    ///         let access = Access::new().write(BufferId::of(&total));
    ///         region.spawn(access, || {
    ///             total.fetch_add(1, Ordering::Relaxed);
    ///         })?;
    ///     }
    ///     Ok::<(), paladin::Error>(())
    /// })??;
    /// assert_eq!(total.into_inner(), 4);
    /// # Ok::<(), paladin::Error>(())
    /// ```
    pub fn task_region<'r, F, R>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&TaskRegion<'_, 'r>) -> R,
    {
        match self.backend() {
            BackendKind::Sequential => {
                let region = TaskRegion::new(self, Box::new(InlineScheduler));
                let out = op(&region);
                region.finish().map(|()| out)
            }
            BackendKind::ExplicitSynch => self.pool()?.in_place_scope(|scope| {
                let region = TaskRegion::new(self, Box::new(PoolScheduler { scope }));
                let out = op(&region);
                region.finish().map(|()| out)
            }),
            BackendKind::Dataflow => self.pool()?.in_place_scope(|scope| {
                let region = TaskRegion::new(self, Box::new(DataflowScheduler::new(scope)));
                let out = op(&region);
                region.finish().map(|()| out)
            }),
        }
    }
}

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

/// Install the process-wide runtime.
///
/// # Errors
/// - [`Error::InvalidConfiguration`] if `config` is invalid.
/// - [`Error::InvalidState`] if a process-wide runtime already exists,
///   whether installed by an earlier call or created lazily by [`global`].
pub fn init(config: Config) -> Result<&'static Runtime> {
    let runtime = Runtime::new(config)?;
    let mut installed = false;
    let global = GLOBAL.get_or_init(|| {
        installed = true;
        runtime
    });
    if installed {
        Ok(global)
    } else {
        Err(Error::invalid_state(format!(
            "process-wide runtime already initialised with backend {}",
            global.backend()
        )))
    }
}

/// The process-wide runtime, created from the environment on first use if
/// [`init`] was not called.
///
/// # Errors
/// [`Error::InvalidConfiguration`] if the environment holds an invalid value.
pub fn global() -> Result<&'static Runtime> {
    if let Some(runtime) = GLOBAL.get() {
        return Ok(runtime);
    }
    let runtime = Runtime::from_env()?;
    Ok(GLOBAL.get_or_init(|| runtime))
}

/// Backend of the process-wide runtime.
///
/// # Errors
/// See [`global`].
pub fn active_backend() -> Result<BackendKind> {
    global().map(Runtime::backend)
}

/// [`Runtime::parallel_for`] on the process-wide runtime.
///
/// # Errors
/// See [`global`] and [`Runtime::parallel_for`].
pub fn parallel_for<F, O>(splitter: &Splitter, size: usize, body: F) -> Result<()>
where
    F: Fn(Range) -> O + Sync,
    O: Outcome,
{
    global()?.parallel_for(splitter, size, body)
}

/// [`Runtime::task_region`] on the process-wide runtime.
///
/// # Errors
/// See [`global`] and [`Runtime::task_region`].
pub fn task_region<'r, F, R>(op: F) -> Result<R>
where
    F: FnOnce(&TaskRegion<'_, 'r>) -> R,
{
    global()?.task_region(op)
}
