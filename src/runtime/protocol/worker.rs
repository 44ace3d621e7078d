//! Context-side protocol
//!
//! The fixed program every context runs: wait for the initial message,
//! resolve the script's handlers, call the task, reconcile how it finished
//! and post exactly one terminal message.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::helpers::{Helpers, Scope};
use super::message::{InitMessage, MessagePort, Transferable, WorkerMessage};
use super::{TaskResult, TaskReturn};
use crate::runtime::cancel::CancellationHandle;
use crate::runtime::script::{HandlerRegistry, TaskScript};

/// Run `script` inside the current context.
///
/// Returns once the terminal message is posted, or without posting one if
/// the host went away before sending the initial message or the task never
/// finished.
pub fn serve(
    script: TaskScript,
    registry: Arc<HandlerRegistry>,
    inbox: Receiver<InitMessage>,
    port: MessagePort,
) {
    let init = match inbox.recv() {
        Ok(init) => init,
        Err(_) => {
            debug!(task = %script.task(), "context closed before the initial message");
            return;
        }
    };

    let cancellation = init
        .cancellation
        .unwrap_or_else(CancellationHandle::local);

    match execute(&script, &registry, init.data, &cancellation, init.transfer, &port) {
        Some(result) => {
            let message = terminal_message(result, &cancellation);
            trace!(task = %script.task(), ?message, "posting terminal message");
            port.post(&message);
        }
        None => debug!(task = %script.task(), "task finished without settling"),
    }
}

/// The terminal message for `result`. The flag is read again here, so a
/// cancellation requested after the value was produced still reports as
/// cancelled.
pub fn terminal_message(
    result: TaskResult,
    cancellation: &CancellationHandle,
) -> WorkerMessage {
    match result {
        Ok(_) if cancellation.cancelled() => WorkerMessage::Cancelled {},
        Ok(value) => WorkerMessage::Done { value },
        Err(error) => WorkerMessage::Error { error },
    }
}

/// Call the task and decide its result.
///
/// Precedence: a settled [`Deferred`](super::Deferred) wins; then a
/// `done`/`error` made during the call; then a returned value; then, if
/// cancellation was requested, an undefined result. Otherwise, and also
/// when a returned deferred is dropped unsettled, wait for a helper clone
/// to finish the task.
fn execute(
    script: &TaskScript,
    registry: &HandlerRegistry,
    data: Value,
    cancellation: &CancellationHandle,
    transfer: Vec<Transferable>,
    port: &MessagePort,
) -> Option<TaskResult> {
    let task = match registry.task(script.task()) {
        Some(task) => task,
        None => {
            return Some(Err(Value::String(format!(
                "ReferenceError: {} is not defined",
                script.task()
            ))))
        }
    };

    let (completion_tx, completion_rx) = bounded(1);
    let helpers = Helpers::new(
        cancellation.clone(),
        port.clone(),
        resolve_scope(script, registry),
        transfer,
        completion_tx,
    );

    let returned = panic::catch_unwind(AssertUnwindSafe(|| task(data, &helpers)));
    drop(helpers);

    let returned = match returned {
        Ok(returned) => returned,
        Err(payload) => return Some(Err(panic_value(payload))),
    };

    if let TaskReturn::Deferred(deferred) = returned {
        return deferred.wait().or_else(|| completion_rx.recv().ok());
    }

    if let Ok(settled) = completion_rx.try_recv() {
        return Some(settled);
    }

    if let TaskReturn::Value(value) = returned {
        return Some(Ok(Some(value)));
    }

    if cancellation.cancelled() {
        return Some(Ok(None));
    }

    completion_rx.recv().ok()
}

/// Resolve the injected auxiliaries. Names missing from the registry stay
/// undefined in the context.
fn resolve_scope(
    script: &TaskScript,
    registry: &HandlerRegistry,
) -> Scope {
    let mut scope = Scope::new();
    for id in script.injected() {
        match registry.auxiliary(id) {
            Some(handler) => {
                scope.insert(id.clone(), handler);
            }
            None => warn!(auxiliary = %id, "injected handler is not registered"),
        }
    }
    scope
}

fn panic_value(payload: Box<dyn Any + Send>) -> Value {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    };
    Value::String(message)
}
