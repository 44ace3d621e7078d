//! inline-worker
//!
//! Run ad-hoc tasks inside isolated execution contexts. The host gets back
//! an [`Outcome`](runtime::Outcome), streams intermediate values through
//! observers and can request cooperative cancellation through a flag the
//! task polls.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use inline_worker::runtime::{ExecutionUnit, HandlerRegistry};
//! use serde_json::{json, Value};
//!
//! fn main() -> inline_worker::Result<()> {
//!     let registry = HandlerRegistry::new();
//!     registry.register_task("double", |data: Value, _| json!(data.as_i64().unwrap_or(0) * 2));
//!
//!     let unit = ExecutionUnit::new("double", Arc::new(registry))?;
//!     let outcome = unit.run(json!(21))?;
//!     assert_eq!(outcome.wait(), Ok(Some(json!(42))));
//!     Ok(())
//! }
//! ```

#![warn(rust_2018_idioms)]

pub mod runtime;
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use thiserror::Error;

use std::sync::Arc;

use tracing::debug;

use crate::runtime::{ExecutionUnit, HandlerId, HandlerRegistry};
use crate::util::config::WorkerConfig;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "inline-worker";

/// Build a unit for `task` from `config` with `auxiliaries` injected.
pub fn prepare_unit<I, H>(
    registry: Arc<HandlerRegistry>,
    task: &str,
    auxiliaries: I,
    config: &WorkerConfig,
) -> Result<ExecutionUnit>
where
    I: IntoIterator<Item = H>,
    H: Into<HandlerId>,
{
    debug!(task, "preparing execution unit");
    let mut unit = ExecutionUnit::from_config(task, registry, config)
        .with_context(|| format!("Failed to create execution unit for {}", task))?;
    unit.inject(auxiliaries);
    Ok(unit)
}
