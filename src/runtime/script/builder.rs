//! Task script builder
//!
//! A [`TaskScript`] is everything a context needs to run one task: the
//! entry handler and the auxiliary handlers to expose next to it. The
//! message protocol itself is fixed and lives in the context runtime
//! (see `protocol::worker`), so the script only names what to plug in.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::registry::HandlerId;

/// Self-contained description of the program a context runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskScript {
    task: HandlerId,
    injected: Vec<HandlerId>,
}

impl TaskScript {
    /// The entry handler.
    #[inline]
    pub fn task(&self) -> &HandlerId {
        &self.task
    }

    /// Auxiliary handlers, in injection order, without duplicates.
    #[inline]
    pub fn injected(&self) -> &[HandlerId] {
        &self.injected
    }

    pub fn is_injected(
        &self,
        id: &HandlerId,
    ) -> bool {
        self.injected.contains(id)
    }

    /// Number of handlers the context has to resolve.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        1 + self.injected.len()
    }
}

/// Accumulates the task and its injected auxiliaries.
#[derive(Debug, Clone)]
pub struct TaskScriptBuilder {
    task: HandlerId,
    injected: IndexSet<HandlerId>,
}

impl TaskScriptBuilder {
    pub fn new(task: impl Into<HandlerId>) -> Self {
        Self {
            task: task.into(),
            injected: IndexSet::new(),
        }
    }

    /// Add an auxiliary handler. Returns false if it was already present.
    pub fn inject(
        &mut self,
        id: impl Into<HandlerId>,
    ) -> bool {
        self.injected.insert(id.into())
    }

    /// Add several auxiliary handlers.
    pub fn inject_all<I>(
        &mut self,
        ids: I,
    ) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<HandlerId>,
    {
        for id in ids {
            self.inject(id);
        }
        self
    }

    #[inline]
    pub fn task(&self) -> &HandlerId {
        &self.task
    }

    pub fn injected(&self) -> impl Iterator<Item = &HandlerId> {
        self.injected.iter()
    }

    /// Snapshot the current state. Later injections do not affect the
    /// returned script.
    pub fn build(&self) -> TaskScript {
        TaskScript {
            task: self.task.clone(),
            injected: self.injected.iter().cloned().collect(),
        }
    }
}
