use crate::{
    error::{Error, Result},
    splitter::{CuttingStrategy, Splitter, StrategyParameter},
};
use core::str::FromStr;
use derive_more::Display;
use std::{num::NonZeroUsize, thread};

/// Environment variable selecting the backend: `sequential`, `explicit` or
/// `dataflow`.
pub const ENV_BACKEND: &str = "PALADIN_BACKEND";
/// Environment variable with the worker count (integer, at least 1).
pub const ENV_NUM_THREADS: &str = "PALADIN_NUM_THREADS";
/// Environment variable toggling the conflict checker (`1`/`0`,
/// `true`/`false`).
pub const ENV_CHECK_CONFLICTS: &str = "PALADIN_CHECK_CONFLICTS";

/// Execution substrate of a runtime.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Everything runs inline on the calling thread, in order.
    #[display("sequential")]
    Sequential,
    /// Thread pool; tasks are ordered only by synchronization group joins.
    #[display("explicit-synch")]
    ExplicitSynch,
    /// Thread pool; tasks are additionally ordered by declared data
    /// dependencies.
    #[display("dataflow")]
    Dataflow,
}

impl BackendKind {
    /// Backend selected by cargo features: `force-seq` wins, then
    /// `dataflow`, otherwise explicit-synch.
    #[must_use]
    pub const fn build_default() -> Self {
        if cfg!(feature = "force-seq") {
            Self::Sequential
        } else if cfg!(feature = "dataflow") {
            Self::Dataflow
        } else {
            Self::ExplicitSynch
        }
    }

    /// `true` if the backend runs work on a thread pool.
    #[must_use]
    pub const fn is_parallel(self) -> bool {
        !matches!(self, Self::Sequential)
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::build_default()
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" | "seq" => Ok(Self::Sequential),
            "explicit" | "explicit-synch" | "explicit_synch" => Ok(Self::ExplicitSynch),
            "dataflow" => Ok(Self::Dataflow),
            other => Err(Error::invalid_configuration(format!(
                "unknown backend {other:?}"
            ))),
        }
    }
}

/// Runtime configuration.
///
/// Chosen once per runtime; a runtime never switches backend or resizes its
/// pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Worker count of the pool, and processor count of splitters derived
    /// with [`Config::splitter`].
    pub num_threads: usize,
    /// Backend.
    pub backend: BackendKind,
    /// Run the [`ConflictChecker`](crate::conflict::ConflictChecker) around
    /// every task body.
    pub check_conflicts: bool,
    /// Name prefix of worker threads.
    pub thread_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            backend: BackendKind::default(),
            check_conflicts: cfg!(debug_assertions),
            thread_name: "paladin-worker".to_owned(),
        }
    }
}

impl Config {
    /// Start from the defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Defaults overridden by [`ENV_BACKEND`], [`ENV_NUM_THREADS`] and
    /// [`ENV_CHECK_CONFLICTS`].
    ///
    /// # Errors
    /// [`Error::InvalidConfiguration`] if a variable is set to an invalid
    /// value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(backend) = lookup(ENV_BACKEND) {
            builder = builder.backend(backend.parse()?);
        }
        if let Some(threads) = lookup(ENV_NUM_THREADS) {
            let threads = threads.trim().parse().map_err(|_| {
                Error::invalid_configuration(format!("{ENV_NUM_THREADS}={threads:?} is not a count"))
            })?;
            builder = builder.num_threads(threads);
        }
        if let Some(check) = lookup(ENV_CHECK_CONFLICTS) {
            let check = match check.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(Error::invalid_configuration(format!(
                        "{ENV_CHECK_CONFLICTS}={other:?} is not a boolean"
                    )));
                }
            };
            builder = builder.check_conflicts(check);
        }
        builder.build()
    }

    /// # Errors
    /// [`Error::InvalidConfiguration`] if `num_threads` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(Error::invalid_configuration(
                "thread count must be at least 1",
            ));
        }
        Ok(())
    }

    /// Splitter for this configuration's processor count.
    ///
    /// # Errors
    /// See [`Splitter::new`].
    pub fn splitter(
        &self,
        strategy: CuttingStrategy,
        parameter: StrategyParameter,
    ) -> Result<Splitter> {
        Splitter::new(self.num_threads, strategy, parameter)
    }
}

/// Builder of [`Config`].
#[derive(Debug, Default)]
#[must_use]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Worker count.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.config.num_threads = num_threads;
        self
    }

    /// Backend.
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    /// Enable or disable the conflict checker.
    pub fn check_conflicts(mut self, check: bool) -> Self {
        self.config.check_conflicts = check;
        self
    }

    /// Worker thread name prefix.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Validate and return the configuration.
    ///
    /// # Errors
    /// See [`Config::validate`].
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
