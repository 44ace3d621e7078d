//! Worker message protocol
//!
//! The contract between a task and the host:
//!
//! - a task is called with `(data, helpers)`;
//! - it may stream values with `helpers.next`, report progress with
//!   `helpers.progress`, and must poll `helpers.cancelled` if it wants to
//!   be cancellable;
//! - it finishes by returning a value, returning a [`Deferred`], or calling
//!   `helpers.done` / `helpers.error`.
//!
//! The context runtime turns that into exactly one terminal message.

pub mod deferred;
pub mod helpers;
pub mod message;
pub mod worker;

pub use deferred::{Deferred, Resolver};
pub use helpers::{Helpers, Scope};
pub use message::{InitMessage, MessagePort, Transferable, WorkerMessage};

use serde_json::Value;

/// Settled result of a run: `Ok(None)` is a result without a value.
pub type TaskResult = Result<Option<Value>, Value>;

/// What a task returns.
#[derive(Debug)]
pub enum TaskReturn {
    /// No value. The run is settled by `done`/`error` or cancellation.
    Undefined,
    /// Resolve with this value unless `done`/`error` was already called.
    Value(Value),
    /// Settle when the deferred settles.
    Deferred(Deferred),
}

impl From<Value> for TaskReturn {
    fn from(value: Value) -> Self {
        TaskReturn::Value(value)
    }
}

impl From<Option<Value>> for TaskReturn {
    fn from(value: Option<Value>) -> Self {
        match value {
            Some(value) => TaskReturn::Value(value),
            None => TaskReturn::Undefined,
        }
    }
}

impl From<Deferred> for TaskReturn {
    fn from(deferred: Deferred) -> Self {
        TaskReturn::Deferred(deferred)
    }
}

impl From<()> for TaskReturn {
    fn from(_: ()) -> Self {
        TaskReturn::Undefined
    }
}
