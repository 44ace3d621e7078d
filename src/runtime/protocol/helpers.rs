//! Task helpers
//!
//! Everything a task can do besides computing: poll for cancellation,
//! stream values to the host, report progress, finish explicitly, and call
//! the auxiliary handlers injected next to it.
//!
//! Cancellation is cooperative. A task that runs for a while is expected
//! to check [`Helpers::cancelled`] at points where stopping is safe and
//! return early; nothing else will stop it. A terminated context reads as
//! cancelled too, so the same check ends work nobody listens to any more.

use std::fmt;
use std::sync::Arc;

use crossbeam::channel::Sender;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;

use super::message::{MessagePort, Transferable, WorkerMessage};
use super::TaskResult;
use crate::runtime::cancel::CancellationHandle;
use crate::runtime::script::{AuxFn, HandlerId};

/// Auxiliary handlers visible to one task, by name.
pub type Scope = IndexMap<HandlerId, Arc<AuxFn>>;

/// Handle given to a running task. Cheap to clone; clones may be moved to
/// other threads the task starts and used to finish the task later.
#[derive(Clone)]
pub struct Helpers {
    inner: Arc<HelpersInner>,
    completion: Sender<TaskResult>,
}

struct HelpersInner {
    cancellation: CancellationHandle,
    port: MessagePort,
    scope: Scope,
    transfer: Mutex<Vec<Transferable>>,
}

impl Helpers {
    pub(crate) fn new(
        cancellation: CancellationHandle,
        port: MessagePort,
        scope: Scope,
        transfer: Vec<Transferable>,
        completion: Sender<TaskResult>,
    ) -> Self {
        Self {
            inner: Arc::new(HelpersInner {
                cancellation,
                port,
                scope,
                transfer: Mutex::new(transfer),
            }),
            completion,
        }
    }

    /// Whether the host has requested cancellation or terminated the
    /// context.
    #[inline]
    pub fn cancelled(&self) -> bool {
        self.inner.cancellation.cancelled() || self.inner.port.is_closed()
    }

    /// Whether the host has terminated the context.
    #[inline]
    pub fn terminated(&self) -> bool {
        self.inner.port.is_closed()
    }

    /// Stream an intermediate value to the host's `subscribe` observer.
    pub fn next(
        &self,
        value: Value,
    ) {
        self.inner.port.post(&WorkerMessage::Next { value });
    }

    /// Report progress to the host's `progress` observer.
    pub fn progress(
        &self,
        value: Value,
    ) {
        self.inner.port.post(&WorkerMessage::Progress { value });
    }

    /// Finish with `value`. Only the first `done`/`error` counts.
    pub fn done(
        &self,
        value: Value,
    ) {
        let _ = self.completion.try_send(Ok(Some(value)));
    }

    /// Finish without a value.
    pub fn done_undefined(&self) {
        let _ = self.completion.try_send(Ok(None));
    }

    /// Fail with `error`. Only the first `done`/`error` counts.
    pub fn error(
        &self,
        error: Value,
    ) {
        let _ = self.completion.try_send(Err(error));
    }

    /// Call an injected auxiliary handler.
    ///
    /// Names that were not injected are not defined in this context and
    /// yield an error value.
    pub fn call(
        &self,
        name: &str,
        arg: Value,
    ) -> Result<Value, Value> {
        match self.inner.scope.get(&HandlerId::from(name)) {
            Some(handler) => handler(arg),
            None => Err(Value::String(format!("ReferenceError: {} is not defined", name))),
        }
    }

    /// Whether `name` was injected into this context.
    pub fn is_defined(
        &self,
        name: &str,
    ) -> bool {
        self.inner.scope.contains_key(&HandlerId::from(name))
    }

    /// Take the buffers moved in with the initial message. Later calls
    /// return an empty list.
    pub fn take_transfer(&self) -> Vec<Transferable> {
        std::mem::take(&mut *self.inner.transfer.lock())
    }

    /// The cell polled by [`cancelled`](Self::cancelled).
    pub fn cancellation(&self) -> &CancellationHandle {
        &self.inner.cancellation
    }
}

impl fmt::Debug for Helpers {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Helpers")
            .field("cancelled", &self.cancelled())
            .field("scope", &self.inner.scope.keys().collect::<Vec<_>>())
            .finish()
    }
}
