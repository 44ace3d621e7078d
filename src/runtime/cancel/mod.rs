//! Cooperative cancellation
//!
//! Cancellation is a flag in memory both the host and the context can see.
//! The host stores 1 to request cancellation; the task polls the flag and
//! decides for itself when to stop. Nothing here interrupts running code.

pub mod arena;
pub mod buffer;
pub mod token;

pub use arena::{TokenArena, DEFAULT_CAPACITY};
pub use buffer::{CancellationBuffer, CancellationHandle, FLAG_BYTES, FLAG_CLEAR, FLAG_SET};
pub use token::{CancellationToken, TokenMode};
