//! Flag memory shared between the host and execution contexts.
//!
//! A [`CancellationBuffer`] is a fixed run of 32-bit cells accessed only
//! through atomic loads and stores. When shared memory is permitted every
//! clone points at the same cells. A private buffer is copied when it is
//! handed to a context, so writes on one side are never seen by the other.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Size of one flag cell in bytes.
pub const FLAG_BYTES: usize = std::mem::size_of::<i32>();

/// Value stored in a cell that signals cancellation.
pub const FLAG_SET: i32 = 1;

/// Value stored in a cell that is not cancelled.
pub const FLAG_CLEAR: i32 = 0;

/// A run of atomically accessed flag cells.
#[derive(Clone)]
pub struct CancellationBuffer {
    cells: Arc<[AtomicI32]>,
    shared: bool,
}

impl CancellationBuffer {
    /// Create a buffer of `len` cleared cells.
    pub fn new(
        len: usize,
        shared: bool,
    ) -> Self {
        Self {
            cells: (0..len).map(|_| AtomicI32::new(FLAG_CLEAR)).collect(),
            shared,
        }
    }

    /// Create a buffer visible to every context it is handed to.
    #[inline]
    pub fn shared(len: usize) -> Self {
        Self::new(len, true)
    }

    /// Create a buffer that is copied when handed to a context.
    #[inline]
    pub fn private(len: usize) -> Self {
        Self::new(len, false)
    }

    /// A zero-length segment. Every index is out of bounds.
    #[inline]
    pub fn empty() -> Self {
        Self::new(0, false)
    }

    /// Number of cells.
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the buffer has no cells.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Length in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.cells.len() * FLAG_BYTES
    }

    /// Whether clones and transfers alias the same memory.
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Whether `index` addresses a cell of this buffer.
    #[inline]
    pub fn contains(
        &self,
        index: usize,
    ) -> bool {
        index < self.cells.len()
    }

    /// Atomic load. Out-of-bounds cells read as cleared.
    #[inline]
    pub fn load(
        &self,
        index: usize,
    ) -> i32 {
        self.cells
            .get(index)
            .map(|cell| cell.load(Ordering::SeqCst))
            .unwrap_or(FLAG_CLEAR)
    }

    /// Atomic store. Returns false and writes nothing when out of bounds.
    #[inline]
    pub fn store(
        &self,
        index: usize,
        value: i32,
    ) -> bool {
        match self.cells.get(index) {
            Some(cell) => {
                cell.store(value, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Whether the cell at `index` holds [`FLAG_SET`].
    #[inline]
    pub fn is_set(
        &self,
        index: usize,
    ) -> bool {
        self.load(index) == FLAG_SET
    }

    /// Clear every cell.
    pub fn clear_all(&self) {
        for cell in self.cells.iter() {
            cell.store(FLAG_CLEAR, Ordering::SeqCst);
        }
    }

    /// The view of this buffer a context receives.
    ///
    /// Shared buffers alias; private buffers are snapshotted.
    pub fn transfer(&self) -> Self {
        if self.shared {
            return self.clone();
        }

        Self {
            cells: self
                .cells
                .iter()
                .map(|cell| AtomicI32::new(cell.load(Ordering::SeqCst)))
                .collect(),
            shared: false,
        }
    }

    /// Whether both buffers are views of the same cells.
    #[inline]
    pub fn same_memory(
        &self,
        other: &CancellationBuffer,
    ) -> bool {
        Arc::ptr_eq(&self.cells, &other.cells)
    }
}

impl fmt::Debug for CancellationBuffer {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("CancellationBuffer")
            .field("len", &self.len())
            .field("shared", &self.shared)
            .finish()
    }
}

/// One flag cell as seen from inside a context: a buffer plus the index
/// the context polls.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    buffer: CancellationBuffer,
    index: usize,
}

impl CancellationHandle {
    pub fn new(
        buffer: CancellationBuffer,
        index: usize,
    ) -> Self {
        Self { buffer, index }
    }

    /// A private single-cell handle, used when the host sent no buffer.
    pub fn local() -> Self {
        Self::new(CancellationBuffer::private(1), 0)
    }

    #[inline]
    pub fn buffer(&self) -> &CancellationBuffer {
        &self.buffer
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Atomic load of the polled cell, interpreted as `== 1`.
    #[inline]
    pub fn cancelled(&self) -> bool {
        self.buffer.is_set(self.index)
    }
}
