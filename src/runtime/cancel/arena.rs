//! Token arena
//!
//! A fixed number of cancellation slots backed by one shared flag segment.
//! Booking is lock-free: a slot is claimed with a compare-exchange on its
//! booking bit and the lowest free slot always wins.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::debug;

use super::buffer::{CancellationBuffer, FLAG_CLEAR};
use super::token::CancellationToken;
use crate::runtime::errors::{WorkerError, WorkerResult};
use crate::runtime::isolation::{self, CapabilityDetector, StaticCapabilities};
use crate::util::config::WorkerConfig;

/// Default number of slots.
pub const DEFAULT_CAPACITY: usize = 128;

static GLOBAL_ARENA: OnceCell<Arc<TokenArena>> = OnceCell::new();

/// Registry of cancellation slots.
pub struct TokenArena {
    /// `booked[i]` iff slot `i` is owned by a live pooled token.
    booked: Box<[AtomicBool]>,
    /// One cell per slot, or no cells at all when shared memory is not
    /// permitted.
    flags: CancellationBuffer,
    /// Bumped by [`reset`](Self::reset). Tokens booked under an older epoch
    /// are orphaned.
    epoch: AtomicU64,
}

impl TokenArena {
    /// Create an arena with `capacity` slots.
    ///
    /// Without shared memory the flag segment has zero length: slots can
    /// still be booked, but cancel/reset write nothing and every token
    /// reads as not cancelled.
    pub fn new(
        capacity: usize,
        shared_memory: bool,
    ) -> Arc<Self> {
        let flags = if shared_memory {
            CancellationBuffer::shared(capacity)
        } else {
            CancellationBuffer::empty()
        };

        Arc::new(Self {
            booked: (0..capacity).map(|_| AtomicBool::new(false)).collect(),
            flags,
            epoch: AtomicU64::new(0),
        })
    }

    /// Create an arena sized by `config`, consulting `detector` for shared
    /// memory.
    pub fn from_config(
        config: &WorkerConfig,
        detector: &dyn CapabilityDetector,
    ) -> Arc<Self> {
        let shared = isolation::shared_memory_or_warn(detector);
        Self::new(config.arena.capacity, shared)
    }

    /// Construct the process-wide arena. The first call wins; later calls
    /// return the arena that is already installed.
    pub fn install(
        config: &WorkerConfig,
        detector: &dyn CapabilityDetector,
    ) -> &'static Arc<TokenArena> {
        GLOBAL_ARENA.get_or_init(|| Self::from_config(config, detector))
    }

    /// The process-wide arena, built from the default configuration if
    /// nothing was installed.
    pub fn global() -> &'static Arc<TokenArena> {
        GLOBAL_ARENA.get_or_init(|| {
            let config = WorkerConfig::default();
            let detector = StaticCapabilities::from(&config);
            Self::from_config(&config, &detector)
        })
    }

    /// Book the lowest free slot and return a token bound to it.
    ///
    /// The slot's flag is cleared before the token is handed out, so a
    /// value left behind by a previous owner is never observed.
    pub fn register(self: &Arc<Self>) -> WorkerResult<CancellationToken> {
        for (index, slot) in self.booked.iter().enumerate() {
            if slot
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.flags.store(index, FLAG_CLEAR);
                let epoch = self.epoch();
                debug!(index, epoch, "cancellation slot booked");
                return Ok(CancellationToken::pooled(Arc::clone(self), index, epoch));
            }
        }

        Err(WorkerError::CapacityExceeded {
            limit: self.capacity(),
        })
    }

    /// Clear the booking bit of `index` if it was booked under `epoch`.
    /// The flag value is left as is.
    pub(crate) fn release(
        &self,
        index: usize,
        epoch: u64,
    ) {
        if epoch != self.epoch() {
            debug!(index, epoch, "stale release ignored");
            return;
        }
        if let Some(slot) = self.booked.get(index) {
            slot.store(false, Ordering::SeqCst);
            debug!(index, "cancellation slot released");
        }
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.booked.len()
    }

    /// Number of slots currently owned by live tokens.
    pub fn booked_count(&self) -> usize {
        self.booked
            .iter()
            .filter(|slot| slot.load(Ordering::SeqCst))
            .count()
    }

    /// Whether `index` is currently booked.
    pub fn is_booked(
        &self,
        index: usize,
    ) -> bool {
        self.booked
            .get(index)
            .map(|slot| slot.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Current booking epoch.
    #[inline]
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// The shared flag segment.
    #[inline]
    pub fn flags(&self) -> &CancellationBuffer {
        &self.flags
    }

    /// Drop every booking and clear every flag.
    ///
    /// Tokens that are still alive keep their index but no longer own it:
    /// they read as not cancelled, write nothing and freeing them leaves
    /// the slot's new owner alone. Only use this between tests.
    pub fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        for slot in self.booked.iter() {
            slot.store(false, Ordering::SeqCst);
        }
        self.flags.clear_all();
    }
}

impl fmt::Debug for TokenArena {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TokenArena")
            .field("capacity", &self.capacity())
            .field("booked", &self.booked_count())
            .field("epoch", &self.epoch())
            .field("flags", &self.flags)
            .finish()
    }
}
