//! Execution units
//!
//! An [`ExecutionUnit`] binds one task to one context at a time. Each run
//! spawns a context, posts the initial message and hands back an
//! [`Outcome`]. A dispatcher thread applies the context's messages to the
//! unit in send order:
//!
//! | message     | effect                                 |
//! |-------------|----------------------------------------|
//! | `done`      | resolve with `value`, run no longer pending |
//! | `cancelled` | resolve undefined, run no longer pending |
//! | `error`     | reject with `error`, run no longer pending |
//! | `progress`  | progress observer                      |
//! | `next`      | next observer                          |
//! | anything else | ignored                              |

pub mod context;
pub mod outcome;

pub use context::{ContextFactory, ExecutionContext, Spawned, ThreadContextFactory};
pub use outcome::Outcome;

use std::fmt;
use std::sync::Arc;
use std::thread;

use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::runtime::cancel::{CancellationToken, TokenArena, TokenMode};
use crate::runtime::errors::{WorkerError, WorkerResult};
use crate::runtime::isolation::{self, CapabilityDetector, StaticCapabilities};
use crate::runtime::protocol::{InitMessage, TaskResult, Transferable, WorkerMessage};
use crate::runtime::script::{HandlerId, HandlerRegistry, TaskScript, TaskScriptBuilder};
use crate::util::config::WorkerConfig;

/// Callback for `progress` and `next` values.
pub type Observer = Arc<dyn Fn(&Value) + Send + Sync>;

/// Runs one task in isolated contexts.
pub struct ExecutionUnit {
    script: TaskScriptBuilder,
    token: Option<CancellationToken>,
    factory: Arc<dyn ContextFactory>,
    shared: Arc<UnitShared>,
}

struct RunState {
    /// Bumped on every run and every terminate. A dispatcher only acts
    /// while its generation is current.
    generation: u64,
    pending: Option<Outcome>,
    context: Option<Box<dyn ExecutionContext>>,
}

struct UnitShared {
    run: Mutex<RunState>,
    progress: Mutex<Option<Observer>>,
    next: Mutex<Option<Observer>>,
}

impl ExecutionUnit {
    /// A unit for `task` running on threads, configured with defaults.
    pub fn new(
        task: impl Into<HandlerId>,
        registry: Arc<HandlerRegistry>,
    ) -> WorkerResult<Self> {
        Self::builder(task).registry(registry).build()
    }

    /// A unit for `task` configured from `config`.
    pub fn from_config(
        task: impl Into<HandlerId>,
        registry: Arc<HandlerRegistry>,
        config: &WorkerConfig,
    ) -> WorkerResult<Self> {
        Self::builder(task).registry(registry).config(config).build()
    }

    pub fn builder(task: impl Into<HandlerId>) -> ExecutionUnitBuilder {
        ExecutionUnitBuilder::new(task)
    }

    /// Start a run with `data`.
    #[inline]
    pub fn run(
        &self,
        data: Value,
    ) -> WorkerResult<Outcome> {
        self.run_with_transfer(data, Vec::new())
    }

    /// Start a run, moving `transfer` into the context.
    ///
    /// While a run is pending this returns that run's outcome and ignores
    /// the arguments.
    pub fn run_with_transfer(
        &self,
        data: Value,
        transfer: Vec<Transferable>,
    ) -> WorkerResult<Outcome> {
        let mut state = self.shared.run.lock();
        if let Some(pending) = &state.pending {
            trace!(task = %self.script.task(), "run already pending");
            return Ok(pending.clone());
        }

        if let Some(token) = &self.token {
            token.reset();
        }

        let script = self.script.build();
        let Spawned { mut context, inbox } = self.factory.spawn(&script)?;

        // Every dispatcher owns its generation, even when the start fails.
        let generation = state.generation + 1;
        state.generation = generation;
        let outcome = Outcome::pending();
        let dispatcher = self.spawn_dispatcher(&script, generation, outcome.clone(), inbox);
        if let Err(err) = dispatcher {
            context.terminate();
            return Err(err);
        }

        let init = InitMessage {
            data,
            cancellation: self.token.as_ref().map(CancellationToken::handle),
            transfer,
        };
        if let Err(err) = context.post(init) {
            context.terminate();
            return Err(err);
        }

        if let Some(mut previous) = state.context.replace(context) {
            previous.terminate();
        }
        state.pending = Some(outcome.clone());

        debug!(task = %script.task(), generation, "run started");
        Ok(outcome)
    }

    fn spawn_dispatcher(
        &self,
        script: &TaskScript,
        generation: u64,
        outcome: Outcome,
        inbox: Receiver<Value>,
    ) -> WorkerResult<()> {
        let shared = self.shared.clone();
        thread::Builder::new()
            .name(format!("{}-dispatch-{}", script.task(), generation))
            .spawn(move || {
                for raw in inbox.iter() {
                    if shared.deliver(generation, &outcome, raw) {
                        break;
                    }
                }
            })?;
        Ok(())
    }

    /// Request cooperative cancellation of the active context.
    ///
    /// Does nothing when no context is active or the unit has no token.
    pub fn cancel(&self) {
        let state = self.shared.run.lock();
        if state.context.is_none() {
            return;
        }
        if let Some(token) = &self.token {
            token.cancel();
            debug!(task = %self.script.task(), "cancellation requested");
        }
    }

    /// Detach the active context at once.
    ///
    /// A pending outcome is abandoned and never settles. The context's port
    /// is closed, which the task observes through `cancelled()`. The token
    /// stays with the unit for the next run.
    pub fn terminate(&self) {
        let mut state = self.shared.run.lock();
        if let Some(mut context) = state.context.take() {
            context.terminate();
        }
        state.pending = None;
        state.generation += 1;
        debug!(task = %self.script.task(), "unit terminated");
    }

    /// Terminate every unit in `units`.
    pub fn terminate_all<'a, I>(units: I)
    where
        I: IntoIterator<Item = &'a ExecutionUnit>,
    {
        for unit in units {
            unit.terminate();
        }
    }

    /// Whether a run has started and not yet settled.
    pub fn running(&self) -> bool {
        self.shared.run.lock().pending.is_some()
    }

    /// Replace the progress observer.
    pub fn progress<F>(
        &self,
        observer: F,
    ) where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        *self.shared.progress.lock() = Some(Arc::new(observer));
    }

    /// Replace the observer for `next` values.
    pub fn subscribe<F>(
        &self,
        observer: F,
    ) where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        *self.shared.next.lock() = Some(Arc::new(observer));
    }

    /// Add auxiliary handlers to the scripts of later runs. Returns how
    /// many were new.
    pub fn inject<I, H>(
        &mut self,
        ids: I,
    ) -> usize
    where
        I: IntoIterator<Item = H>,
        H: Into<HandlerId>,
    {
        let mut added = 0;
        for id in ids {
            if self.script.inject(id) {
                added += 1;
            }
        }
        added
    }

    /// The script the next run would use.
    pub fn script(&self) -> TaskScript {
        self.script.build()
    }

    pub fn token(&self) -> Option<&CancellationToken> {
        self.token.as_ref()
    }
}

impl Drop for ExecutionUnit {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl fmt::Debug for ExecutionUnit {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ExecutionUnit")
            .field("task", self.script.task())
            .field("token", &self.token)
            .field("running", &self.running())
            .finish()
    }
}

impl UnitShared {
    fn new() -> Self {
        Self {
            run: Mutex::new(RunState {
                generation: 0,
                pending: None,
                context: None,
            }),
            progress: Mutex::new(None),
            next: Mutex::new(None),
        }
    }

    fn is_current(
        &self,
        generation: u64,
    ) -> bool {
        self.run.lock().generation == generation
    }

    /// Apply one raw message. Returns true once the dispatcher should stop.
    fn deliver(
        &self,
        generation: u64,
        outcome: &Outcome,
        raw: Value,
    ) -> bool {
        let message = match WorkerMessage::decode(&raw) {
            Some(message) => message,
            None => {
                trace!(?raw, "ignoring non-protocol message");
                return false;
            }
        };

        match message {
            WorkerMessage::Progress { value } => self.observe(&self.progress, generation, &value),
            WorkerMessage::Next { value } => self.observe(&self.next, generation, &value),
            WorkerMessage::Done { value } => self.settle(generation, outcome, Ok(value)),
            WorkerMessage::Cancelled {} => self.settle(generation, outcome, Ok(None)),
            WorkerMessage::Error { error } => self.settle(generation, outcome, Err(error)),
        }
    }

    fn observe(
        &self,
        observer: &Mutex<Option<Observer>>,
        generation: u64,
        value: &Value,
    ) -> bool {
        if !self.is_current(generation) {
            return true;
        }
        // Called without holding the lock so the observer may touch the unit.
        let observer = observer.lock().clone();
        if let Some(observer) = observer {
            observer(value);
        }
        false
    }

    fn settle(
        &self,
        generation: u64,
        outcome: &Outcome,
        result: TaskResult,
    ) -> bool {
        {
            let mut state = self.run.lock();
            if state.generation != generation {
                trace!(generation, "dropping terminal message of a stale run");
                return true;
            }
            state.pending = None;
        }
        trace!(generation, ?result, "run settled");
        outcome.settle(result);
        true
    }
}

/// Configures an [`ExecutionUnit`].
pub struct ExecutionUnitBuilder {
    script: TaskScriptBuilder,
    config: WorkerConfig,
    registry: Option<Arc<HandlerRegistry>>,
    factory: Option<Arc<dyn ContextFactory>>,
    capabilities: Option<Arc<dyn CapabilityDetector>>,
    arena: Option<Arc<TokenArena>>,
    mode: Option<TokenMode>,
}

impl ExecutionUnitBuilder {
    pub fn new(task: impl Into<HandlerId>) -> Self {
        Self {
            script: TaskScriptBuilder::new(task),
            config: WorkerConfig::default(),
            registry: None,
            factory: None,
            capabilities: None,
            arena: None,
            mode: None,
        }
    }

    /// Take token mode, capabilities and thread settings from `config`.
    pub fn config(
        mut self,
        config: &WorkerConfig,
    ) -> Self {
        self.config = config.clone();
        self
    }

    /// Registry for the default thread factory.
    pub fn registry(
        mut self,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use `factory` instead of spawning threads.
    pub fn factory(
        mut self,
        factory: Arc<dyn ContextFactory>,
    ) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn capabilities(
        mut self,
        capabilities: Arc<dyn CapabilityDetector>,
    ) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Book pooled tokens from `arena` rather than the global one.
    pub fn arena(
        mut self,
        arena: Arc<TokenArena>,
    ) -> Self {
        self.arena = Some(arena);
        self
    }

    pub fn token_mode(
        mut self,
        mode: TokenMode,
    ) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn inject(
        mut self,
        id: impl Into<HandlerId>,
    ) -> Self {
        self.script.inject(id);
        self
    }

    /// Build the unit.
    ///
    /// Fails with [`WorkerError::UnsupportedContext`] when contexts cannot
    /// be created, and with [`WorkerError::CapacityExceeded`] when a pooled
    /// token cannot be booked. Without shared memory the unit gets no token
    /// at all and `cancel` does nothing.
    pub fn build(self) -> WorkerResult<ExecutionUnit> {
        let capabilities: Arc<dyn CapabilityDetector> = self
            .capabilities
            .unwrap_or_else(|| Arc::new(StaticCapabilities::from(&self.config)));
        if !capabilities.contexts_supported() {
            return Err(WorkerError::UnsupportedContext);
        }

        let factory: Arc<dyn ContextFactory> = match self.factory {
            Some(factory) => factory,
            None => {
                let registry = self.registry.unwrap_or_default();
                Arc::new(ThreadContextFactory::from_config(registry, &self.config))
            }
        };
        if !factory.is_supported() {
            return Err(WorkerError::UnsupportedContext);
        }

        let token = if isolation::shared_memory_or_warn(capabilities.as_ref()) {
            let mode = self.mode.unwrap_or(self.config.cancellation.mode);
            let arena = match self.arena {
                Some(arena) => arena,
                None => TokenArena::global().clone(),
            };
            Some(CancellationToken::for_mode(mode, &arena, true)?)
        } else {
            None
        };

        debug!(task = %self.script.task(), token = ?token, "unit created");
        Ok(ExecutionUnit {
            script: self.script,
            token,
            factory,
            shared: Arc::new(UnitShared::new()),
        })
    }
}

#[cfg(test)]
mod tests;
