//! Runtime system
//!
//! Cooperative cancellation, task scripts, the message protocol and the
//! execution units that tie them together.

pub mod builtin;
pub mod cancel;
pub mod errors;
pub mod isolation;
pub mod protocol;
pub mod script;
pub mod unit;

pub use cancel::{CancellationToken, TokenArena, TokenMode};
pub use errors::{WorkerError, WorkerResult};
pub use isolation::{CapabilityDetector, StaticCapabilities};
pub use protocol::{Deferred, Helpers, TaskResult, TaskReturn};
pub use script::{HandlerId, HandlerRegistry, TaskScriptBuilder};
pub use unit::{ExecutionUnit, ExecutionUnitBuilder, Outcome};
