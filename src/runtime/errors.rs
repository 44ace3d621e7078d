//! Runtime errors

use thiserror::Error;

/// Runtime result
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors raised by the host side of the runtime.
///
/// Failures inside a running task never show up here; they reject the
/// task's [`Outcome`](crate::runtime::unit::Outcome) with the task's own
/// error value.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Number of cancellation tokens exceeded the admissible limit ({limit})")]
    CapacityExceeded { limit: usize },

    #[error("Isolated execution contexts are not supported in this environment")]
    UnsupportedContext,

    #[error("Failed to spawn execution context: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Execution context closed before the initial message was delivered")]
    ContextClosed,
}
