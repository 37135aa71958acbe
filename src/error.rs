use rayon::ThreadPoolBuildError;
use std::any::Any;
use thiserror::Error;

/// Boxed error type accepted from fallible loop and task bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// `Result` alias used across the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors surfaced by splitters, loops and task regions.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bad processor count, grain or fixed chunk count, or backend name.
    /// Reported before any work is dispatched.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Operation on a task group in the wrong state, such as spawning into a
    /// closed group or joining a group twice.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// A loop or task body failed. Surfaced at the next join point after all
    /// sibling units have finished.
    #[error("{failure}{}", suppressed_note(.suppressed))]
    PropagatedFailure {
        /// The surfaced failure.
        #[source]
        failure: Failure,
        /// Other failures observed at the same join point.
        suppressed: Vec<Failure>,
    },
    /// The worker pool could not be started.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] ThreadPoolBuildError),
}

fn suppressed_note(suppressed: &[Failure]) -> String {
    match suppressed.len() {
        0 => String::new(),
        n => format!(" ({n} more suppressed)"),
    }
}

impl Error {
    pub(crate) fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    pub(crate) fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState(reason.into())
    }

    /// Fold failures collected at a join point into a single error, keeping
    /// the first one and attaching the rest as suppressed.
    pub(crate) fn from_failures(failures: impl IntoIterator<Item = Failure>) -> Option<Self> {
        let mut failures = failures.into_iter();
        let failure = failures.next()?;
        Some(Self::PropagatedFailure {
            failure,
            suppressed: failures.collect(),
        })
    }

    /// Suppressed failures of a [`Error::PropagatedFailure`]; empty otherwise.
    #[must_use]
    pub fn suppressed(&self) -> &[Failure] {
        match self {
            Self::PropagatedFailure { suppressed, .. } => suppressed,
            _ => &[],
        }
    }
}

/// Failure of a single loop or task body.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Failure {
    /// The body panicked; carries the panic message.
    #[error("body panicked: {0}")]
    Panicked(String),
    /// The body returned an error.
    #[error("body failed: {0}")]
    Failed(#[source] BoxError),
}

impl Failure {
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_owned()
        };
        Self::Panicked(message)
    }
}
