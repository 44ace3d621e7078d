//! Handler registry
//!
//! Tasks are not shipped to contexts as code. Every task and every
//! auxiliary function is a named, compiled handler registered here; a
//! context resolves the names it was given when it starts.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtime::protocol::{Helpers, TaskReturn};

/// Name under which a handler is registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(String);

impl HandlerId {
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HandlerId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for HandlerId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&HandlerId> for HandlerId {
    fn from(id: &HandlerId) -> Self {
        id.clone()
    }
}

impl Borrow<str> for HandlerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entry point of a task: receives the run's data and the helpers.
pub type TaskFn = dyn Fn(Value, &Helpers) -> TaskReturn + Send + Sync;

/// Auxiliary function callable from a task through [`Helpers::call`].
pub type AuxFn = dyn Fn(Value) -> Result<Value, Value> + Send + Sync;

/// Lookup table of task and auxiliary handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    tasks: RwLock<HashMap<HandlerId, Arc<TaskFn>>>,
    auxiliaries: RwLock<HashMap<HandlerId, Arc<AuxFn>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task handler, replacing any handler of the same name.
    pub fn register_task<F, R>(
        &self,
        name: impl Into<HandlerId>,
        handler: F,
    ) -> &Self
    where
        F: Fn(Value, &Helpers) -> R + Send + Sync + 'static,
        R: Into<TaskReturn>,
    {
        let handler: Arc<TaskFn> =
            Arc::new(move |data: Value, helpers: &Helpers| -> TaskReturn {
                handler(data, helpers).into()
            });
        self.tasks.write().insert(name.into(), handler);
        self
    }

    /// Register an auxiliary handler, replacing any of the same name.
    pub fn register_auxiliary<F>(
        &self,
        name: impl Into<HandlerId>,
        handler: F,
    ) -> &Self
    where
        F: Fn(Value) -> Result<Value, Value> + Send + Sync + 'static,
    {
        self.auxiliaries
            .write()
            .insert(name.into(), Arc::new(handler));
        self
    }

    pub fn task(
        &self,
        id: &HandlerId,
    ) -> Option<Arc<TaskFn>> {
        self.tasks.read().get(id).cloned()
    }

    pub fn auxiliary(
        &self,
        id: &HandlerId,
    ) -> Option<Arc<AuxFn>> {
        self.auxiliaries.read().get(id).cloned()
    }

    pub fn contains_task(
        &self,
        name: &str,
    ) -> bool {
        self.tasks.read().contains_key(name)
    }

    pub fn contains_auxiliary(
        &self,
        name: &str,
    ) -> bool {
        self.auxiliaries.read().contains_key(name)
    }

    /// Registered task names, sorted.
    pub fn task_names(&self) -> Vec<HandlerId> {
        let mut names: Vec<_> = self.tasks.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered auxiliary names, sorted.
    pub fn auxiliary_names(&self) -> Vec<HandlerId> {
        let mut names: Vec<_> = self.auxiliaries.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("tasks", &self.task_names())
            .field("auxiliaries", &self.auxiliary_names())
            .finish()
    }
}
