//! Cancellation tokens
//!
//! One token type with two construction modes:
//!
//! - `Pooled`: bound to a slot of a [`TokenArena`]. Subject to the arena's
//!   capacity; the slot is reused after [`CancellationToken::free`].
//! - `Standalone`: owns a private single-cell buffer. No capacity limit.
//!
//! Both expose the same cancel/reset/cancelled/buffer contract.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::arena::TokenArena;
use super::buffer::{CancellationBuffer, CancellationHandle, FLAG_CLEAR, FLAG_SET};
use crate::runtime::errors::WorkerResult;

/// How execution units obtain their token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenMode {
    /// One private buffer per unit.
    #[default]
    Standalone,
    /// A slot of the token arena.
    Pooled,
}

impl FromStr for TokenMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standalone" => Ok(TokenMode::Standalone),
            "pooled" => Ok(TokenMode::Pooled),
            other => Err(format!("unknown token mode: {}", other)),
        }
    }
}

impl fmt::Display for TokenMode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            TokenMode::Standalone => write!(f, "standalone"),
            TokenMode::Pooled => write!(f, "pooled"),
        }
    }
}

enum Slot {
    Pooled {
        arena: Arc<TokenArena>,
        index: usize,
        epoch: u64,
        freed: AtomicBool,
    },
    Standalone {
        buffer: CancellationBuffer,
    },
}

/// Handle to one cancellation flag.
pub struct CancellationToken {
    slot: Slot,
}

impl CancellationToken {
    /// Book a slot of the process-wide arena.
    pub fn register() -> WorkerResult<Self> {
        TokenArena::global().register()
    }

    /// A token over its own single-cell buffer.
    pub fn standalone(shared_memory: bool) -> Self {
        Self {
            slot: Slot::Standalone {
                buffer: CancellationBuffer::new(1, shared_memory),
            },
        }
    }

    /// Build a token for `mode`, booking from `arena` when pooled.
    pub fn for_mode(
        mode: TokenMode,
        arena: &Arc<TokenArena>,
        shared_memory: bool,
    ) -> WorkerResult<Self> {
        match mode {
            TokenMode::Standalone => Ok(Self::standalone(shared_memory)),
            TokenMode::Pooled => arena.register(),
        }
    }

    pub(crate) fn pooled(
        arena: Arc<TokenArena>,
        index: usize,
        epoch: u64,
    ) -> Self {
        Self {
            slot: Slot::Pooled {
                arena,
                index,
                epoch,
                freed: AtomicBool::new(false),
            },
        }
    }

    /// The buffer and cell this token writes, or `None` once freed or
    /// orphaned by an arena reset.
    fn cell(&self) -> Option<(&CancellationBuffer, usize)> {
        match &self.slot {
            Slot::Pooled {
                arena,
                index,
                epoch,
                freed,
            } => {
                if freed.load(Ordering::SeqCst) || arena.epoch() != *epoch {
                    None
                } else {
                    Some((arena.flags(), *index))
                }
            }
            Slot::Standalone { buffer } => Some((buffer, 0)),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        if let Some((buffer, index)) = self.cell() {
            buffer.store(index, FLAG_SET);
        }
    }

    /// Withdraw a cancellation request.
    pub fn reset(&self) {
        if let Some((buffer, index)) = self.cell() {
            buffer.store(index, FLAG_CLEAR);
        }
    }

    /// Whether cancellation is currently requested.
    pub fn cancelled(&self) -> bool {
        self.cell()
            .map(|(buffer, index)| buffer.is_set(index))
            .unwrap_or(false)
    }

    /// The arena slot, for pooled tokens.
    pub fn index(&self) -> Option<usize> {
        match &self.slot {
            Slot::Pooled { index, .. } => Some(*index),
            Slot::Standalone { .. } => None,
        }
    }

    pub fn mode(&self) -> TokenMode {
        match &self.slot {
            Slot::Pooled { .. } => TokenMode::Pooled,
            Slot::Standalone { .. } => TokenMode::Standalone,
        }
    }

    /// The memory holding this token's flag.
    pub fn buffer(&self) -> &CancellationBuffer {
        match &self.slot {
            Slot::Pooled { arena, .. } => arena.flags(),
            Slot::Standalone { buffer } => buffer,
        }
    }

    /// What a context needs to poll this token.
    pub fn handle(&self) -> CancellationHandle {
        let index = self.index().unwrap_or(0);
        CancellationHandle::new(self.buffer().transfer(), index)
    }

    /// Give the slot back to the arena. Only the first call has an effect.
    /// The flag value is not touched.
    pub fn free(&self) {
        if let Slot::Pooled {
            arena,
            index,
            epoch,
            freed,
        } = &self.slot
        {
            if !freed.swap(true, Ordering::SeqCst) {
                arena.release(*index, *epoch);
            }
        }
    }

    /// Whether a pooled token has given up its slot, either through
    /// [`free`](Self::free) or because the arena was reset under it.
    pub fn is_freed(&self) -> bool {
        match &self.slot {
            Slot::Pooled {
                arena,
                epoch,
                freed,
                ..
            } => freed.load(Ordering::SeqCst) || arena.epoch() != *epoch,
            Slot::Standalone { .. } => false,
        }
    }
}

impl Drop for CancellationToken {
    fn drop(&mut self) {
        self.free();
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("mode", &self.mode())
            .field("index", &self.index())
            .field("cancelled", &self.cancelled())
            .field("freed", &self.is_freed())
            .finish()
    }
}
