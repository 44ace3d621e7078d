//! Task scripts
//!
//! What a context is asked to run, and where it looks the names up.

pub mod builder;
pub mod registry;

pub use builder::{TaskScript, TaskScriptBuilder};
pub use registry::{AuxFn, HandlerId, HandlerRegistry, TaskFn};
