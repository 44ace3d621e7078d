//! Execution contexts
//!
//! A context is an independently scheduled environment that talks to the
//! host only through messages and the cancellation flag. The default
//! factory runs each context on a dedicated OS thread.
//!
//! Threads cannot be killed from outside. Terminating a thread context
//! closes its message port: the thread keeps running until the task
//! returns, but nothing it posts reaches the host any more.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use serde_json::Value;
use tracing::debug;

use crate::runtime::errors::{WorkerError, WorkerResult};
use crate::runtime::protocol::{worker, InitMessage, MessagePort};
use crate::runtime::script::{HandlerRegistry, TaskScript};
use crate::util::config::WorkerConfig;

/// Host-side handle of one running context.
pub trait ExecutionContext: Send {
    /// Deliver the initial message.
    fn post(
        &mut self,
        message: InitMessage,
    ) -> WorkerResult<()>;

    /// Stop listening to the context immediately.
    fn terminate(&mut self);

    fn is_terminated(&self) -> bool;
}

/// A freshly spawned context and the channel its messages arrive on.
pub struct Spawned {
    pub context: Box<dyn ExecutionContext>,
    pub inbox: Receiver<Value>,
}

impl fmt::Debug for Spawned {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Spawned")
            .field("terminated", &self.context.is_terminated())
            .finish_non_exhaustive()
    }
}

/// Creates execution contexts from task scripts.
pub trait ContextFactory: Send + Sync {
    /// Whether this factory can create contexts in the current environment.
    fn is_supported(&self) -> bool {
        true
    }

    fn spawn(
        &self,
        script: &TaskScript,
    ) -> WorkerResult<Spawned>;
}

/// Runs every context on its own named thread.
pub struct ThreadContextFactory {
    registry: Arc<HandlerRegistry>,
    name_prefix: String,
    stack_size: usize,
    spawned: AtomicUsize,
}

impl ThreadContextFactory {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self::from_config(registry, &WorkerConfig::default())
    }

    pub fn from_config(
        registry: Arc<HandlerRegistry>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            registry,
            name_prefix: config.context.name_prefix.clone(),
            stack_size: config.context.stack_size,
            spawned: AtomicUsize::new(0),
        }
    }

    /// The registry contexts resolve handlers from.
    #[inline]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Number of contexts spawned so far.
    #[inline]
    pub fn spawned_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

impl ContextFactory for ThreadContextFactory {
    fn spawn(
        &self,
        script: &TaskScript,
    ) -> WorkerResult<Spawned> {
        let (init_tx, init_rx) = bounded(1);
        let (out_tx, out_rx) = unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let port = MessagePort::new(out_tx, closed.clone());

        let id = self.spawned.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}-{}", self.name_prefix, id);
        let registry = self.registry.clone();
        let thread_script = script.clone();

        thread::Builder::new()
            .name(name.clone())
            .stack_size(self.stack_size)
            .spawn(move || worker::serve(thread_script, registry, init_rx, port))?;

        debug!(context = %name, task = %script.task(), "context spawned");

        Ok(Spawned {
            context: Box::new(ThreadContext {
                name,
                init: Some(init_tx),
                closed,
            }),
            inbox: out_rx,
        })
    }
}

impl fmt::Debug for ThreadContextFactory {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ThreadContextFactory")
            .field("name_prefix", &self.name_prefix)
            .field("stack_size", &self.stack_size)
            .field("spawned", &self.spawned_count())
            .finish()
    }
}

/// Host-side handle of a thread context.
struct ThreadContext {
    name: String,
    init: Option<Sender<InitMessage>>,
    closed: Arc<AtomicBool>,
}

impl ExecutionContext for ThreadContext {
    fn post(
        &mut self,
        message: InitMessage,
    ) -> WorkerResult<()> {
        let init = self.init.take().ok_or(WorkerError::ContextClosed)?;
        init.send(message).map_err(|_| WorkerError::ContextClosed)
    }

    fn terminate(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(context = %self.name, "context terminated");
        }
        // A context still waiting for its initial message exits right away.
        self.init = None;
    }

    fn is_terminated(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
