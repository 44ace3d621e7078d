//! Environment capabilities
//!
//! Whether contexts can be created and whether flag memory may be shared
//! with them is decided outside the runtime. The runtime only asks.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::util::config::WorkerConfig;

/// Advisory logged once when shared flag memory is unavailable.
pub const DEGRADED_ISOLATION_WARNING: &str = "CancellationToken is not supported in this environment. Please add following two headers to the top level document: 'Cross-Origin-Embedder-Policy': 'require-corp'; 'Cross-Origin-Opener-Policy': 'same-origin';";

static DEGRADED_WARNED: AtomicBool = AtomicBool::new(false);

/// Answers what the hosting environment permits.
pub trait CapabilityDetector: Send + Sync {
    /// Whether flag memory may be shared across the context boundary.
    fn shared_memory_permitted(&self) -> bool;

    /// Whether isolated execution contexts can be created at all.
    fn contexts_supported(&self) -> bool {
        true
    }
}

/// Fixed answers, usually taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticCapabilities {
    pub shared_memory: bool,
    pub contexts: bool,
}

impl StaticCapabilities {
    /// Everything permitted.
    pub const fn full() -> Self {
        Self {
            shared_memory: true,
            contexts: true,
        }
    }

    /// Contexts work, flag memory stays local.
    pub const fn degraded() -> Self {
        Self {
            shared_memory: false,
            contexts: true,
        }
    }
}

impl Default for StaticCapabilities {
    fn default() -> Self {
        Self::full()
    }
}

impl From<&WorkerConfig> for StaticCapabilities {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            shared_memory: config.cancellation.shared_memory,
            contexts: config.context.enabled,
        }
    }
}

impl CapabilityDetector for StaticCapabilities {
    fn shared_memory_permitted(&self) -> bool {
        self.shared_memory
    }

    fn contexts_supported(&self) -> bool {
        self.contexts
    }
}

/// Ask the detector about shared memory, logging the advisory the first
/// time the answer is no.
pub fn shared_memory_or_warn(detector: &dyn CapabilityDetector) -> bool {
    let permitted = detector.shared_memory_permitted();
    if !permitted && !DEGRADED_WARNED.swap(true, Ordering::SeqCst) {
        warn!("{}", DEGRADED_ISOLATION_WARNING);
    }
    permitted
}

/// Whether the degraded-isolation advisory has been logged in this process.
pub fn degraded_warning_emitted() -> bool {
    DEGRADED_WARNED.load(Ordering::SeqCst)
}
