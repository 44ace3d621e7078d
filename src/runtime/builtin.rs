//! Built-in demo handlers
//!
//! A handful of tasks that exercise each part of the task contract. The
//! CLI runs them; tests and benches use them as fixtures.

use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

use crate::runtime::protocol::{Helpers, TaskReturn};
use crate::runtime::script::HandlerRegistry;

/// Default number of steps for `countdown`.
pub const COUNTDOWN_STEPS: u64 = 10;
/// Default pause between `countdown` steps, in milliseconds.
pub const COUNTDOWN_INTERVAL_MS: u64 = 100;

/// Names and one-line descriptions of the built-in tasks.
pub const BUILTIN_TASKS: &[(&str, &str)] = &[
    ("double", "resolve with the number passed in, times two"),
    (
        "countdown",
        "count down with progress and next values; honours cancel",
    ),
    ("fail", "reject with the data passed in"),
    (
        "sum",
        "sum of squares of an array; needs the `square` auxiliary",
    ),
];

/// Names of the built-in auxiliaries.
pub const BUILTIN_AUXILIARIES: &[&str] = &["square"];

/// Register every built-in task and auxiliary in `registry`.
pub fn register_builtins(registry: &HandlerRegistry) -> &HandlerRegistry {
    registry
        .register_task("double", double)
        .register_task("countdown", countdown)
        .register_task("fail", fail)
        .register_task("sum", sum)
        .register_auxiliary("square", square)
}

/// A registry holding only the built-ins.
pub fn builtin_registry() -> HandlerRegistry {
    let registry = HandlerRegistry::new();
    register_builtins(&registry);
    registry
}

fn double(
    data: Value,
    helpers: &Helpers,
) -> TaskReturn {
    if let Some(n) = data.as_i64() {
        return json!(n * 2).into();
    }
    match data.as_f64() {
        Some(x) => json!(x * 2.0).into(),
        None => {
            helpers.error(json!({ "message": "double expects a number", "data": data }));
            TaskReturn::Undefined
        }
    }
}

/// `data` is either a step count or `{ "steps": n, "interval_ms": ms }`.
fn countdown(
    data: Value,
    helpers: &Helpers,
) -> TaskReturn {
    let (steps, interval) = match &data {
        Value::Number(n) => (n.as_u64().unwrap_or(COUNTDOWN_STEPS), COUNTDOWN_INTERVAL_MS),
        Value::Object(options) => (
            options
                .get("steps")
                .and_then(Value::as_u64)
                .unwrap_or(COUNTDOWN_STEPS),
            options
                .get("interval_ms")
                .and_then(Value::as_u64)
                .unwrap_or(COUNTDOWN_INTERVAL_MS),
        ),
        _ => (COUNTDOWN_STEPS, COUNTDOWN_INTERVAL_MS),
    };

    for remaining in (1..=steps).rev() {
        if helpers.cancelled() {
            return TaskReturn::Undefined;
        }
        helpers.next(json!(remaining));
        helpers.progress(json!((steps - remaining + 1) * 100 / steps));
        thread::sleep(Duration::from_millis(interval));
    }

    if helpers.cancelled() {
        return TaskReturn::Undefined;
    }
    json!("liftoff").into()
}

fn fail(
    data: Value,
    helpers: &Helpers,
) {
    let error = match data {
        Value::Null => json!({ "message": "task failed" }),
        other => other,
    };
    helpers.error(error);
}

fn sum(
    data: Value,
    helpers: &Helpers,
) -> TaskReturn {
    let items = match data.as_array() {
        Some(items) => items.clone(),
        None => {
            helpers.error(json!({ "message": "sum expects an array" }));
            return TaskReturn::Undefined;
        }
    };

    let mut total = 0i64;
    for item in items {
        let squared = match helpers.call("square", item) {
            Ok(value) => value,
            Err(error) => {
                helpers.error(error);
                return TaskReturn::Undefined;
            }
        };
        match squared.as_i64() {
            Some(n) => total += n,
            None => {
                helpers.error(json!({ "message": "square returned a non-integer" }));
                return TaskReturn::Undefined;
            }
        }
    }
    json!(total).into()
}

fn square(value: Value) -> Result<Value, Value> {
    match value.as_i64() {
        Some(n) => Ok(json!(n * n)),
        None => Err(json!({ "message": "square expects an integer", "data": value })),
    }
}
