//! Deferred results
//!
//! A task that finishes later returns a [`Deferred`] and settles it through
//! the paired [`Resolver`], possibly from another thread.

use std::fmt;
use std::thread;

use crossbeam::channel::{bounded, Receiver, Sender};
use serde_json::Value;

use super::TaskResult;

/// Promise-like value a task may return.
pub struct Deferred {
    rx: Receiver<TaskResult>,
}

/// Settles the paired [`Deferred`]. Consumed on use, so it settles once.
pub struct Resolver {
    tx: Sender<TaskResult>,
}

impl Deferred {
    /// A new unsettled deferred and its resolver.
    pub fn channel() -> (Resolver, Deferred) {
        let (tx, rx) = bounded(1);
        (Resolver { tx }, Deferred { rx })
    }

    /// Run `work` on its own thread and settle with its result.
    pub fn spawn<F>(work: F) -> Deferred
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let (resolver, deferred) = Self::channel();
        thread::spawn(move || resolver.settle(work()));
        deferred
    }

    /// Already fulfilled with `value`.
    pub fn resolved(value: Value) -> Deferred {
        let (resolver, deferred) = Self::channel();
        resolver.resolve(value);
        deferred
    }

    /// Already rejected with `error`.
    pub fn rejected(error: Value) -> Deferred {
        let (resolver, deferred) = Self::channel();
        resolver.reject(error);
        deferred
    }

    /// Block until settled. `None` if the resolver was dropped unused.
    pub(crate) fn wait(self) -> Option<TaskResult> {
        self.rx.recv().ok()
    }
}

impl Resolver {
    pub fn settle(
        self,
        result: TaskResult,
    ) {
        // The deferred side may already be gone; nothing is waiting then.
        let _ = self.tx.send(result);
    }

    pub fn resolve(
        self,
        value: Value,
    ) {
        self.settle(Ok(Some(value)));
    }

    /// Fulfil without a value.
    pub fn resolve_undefined(self) {
        self.settle(Ok(None));
    }

    pub fn reject(
        self,
        error: Value,
    ) {
        self.settle(Err(error));
    }
}

impl fmt::Debug for Deferred {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("settled", &!self.rx.is_empty())
            .finish()
    }
}

impl fmt::Debug for Resolver {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}
