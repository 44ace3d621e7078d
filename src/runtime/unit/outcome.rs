//! Run outcomes
//!
//! An [`Outcome`] is the eventual result of one run. It starts pending and
//! settles at most once. Clones share the same state, so every caller that
//! got the handle from the same run observes the same settlement.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::runtime::protocol::TaskResult;

/// Shared handle to the result of a run.
#[derive(Clone)]
pub struct Outcome {
    inner: Arc<OutcomeInner>,
}

struct OutcomeInner {
    result: Mutex<Option<TaskResult>>,
    settled: Condvar,
}

impl Outcome {
    pub(crate) fn pending() -> Self {
        Self {
            inner: Arc::new(OutcomeInner {
                result: Mutex::new(None),
                settled: Condvar::new(),
            }),
        }
    }

    /// Settle with `result`. Returns false if already settled.
    pub(crate) fn settle(
        &self,
        result: TaskResult,
    ) -> bool {
        let mut slot = self.inner.result.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(result);
        self.inner.settled.notify_all();
        true
    }

    pub fn is_settled(&self) -> bool {
        self.inner.result.lock().is_some()
    }

    /// The result, if settled.
    pub fn try_result(&self) -> Option<TaskResult> {
        self.inner.result.lock().clone()
    }

    /// Block until settled.
    ///
    /// An outcome abandoned by `terminate` never settles; use
    /// [`wait_timeout`](Self::wait_timeout) when that can happen.
    pub fn wait(&self) -> TaskResult {
        let mut slot = self.inner.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            self.inner.settled.wait(&mut slot);
        }
    }

    /// Block until settled or `timeout` elapses.
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> Option<TaskResult> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return Some(result.clone());
            }
            if self
                .inner
                .settled
                .wait_until(&mut slot, deadline)
                .timed_out()
            {
                return slot.clone();
            }
        }
    }

    /// Whether both handles belong to the same run.
    #[inline]
    pub fn ptr_eq(
        &self,
        other: &Outcome,
    ) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Outcome {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.try_result() {
            None => f.write_str("Outcome(pending)"),
            Some(Ok(value)) => write!(f, "Outcome(resolved {:?})", value),
            Some(Err(error)) => write!(f, "Outcome(rejected {:?})", error),
        }
    }
}
