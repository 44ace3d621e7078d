//! Cooperative cancellation and termination across real contexts.

use crossbeam::channel::bounded;
use inline_worker::runtime::builtin::builtin_registry;
use inline_worker::runtime::{
    CancellationToken, ExecutionUnit, HandlerRegistry, StaticCapabilities, TokenArena, TokenMode,
    WorkerError,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn countdown_unit(arena: Option<Arc<TokenArena>>) -> ExecutionUnit {
    let mut builder = ExecutionUnit::builder("countdown")
        .registry(Arc::new(builtin_registry()))
        .capabilities(Arc::new(StaticCapabilities::full()));
    if let Some(arena) = arena {
        builder = builder.arena(arena).token_mode(TokenMode::Pooled);
    }
    builder.build().unwrap()
}

fn cancel_mid_loop(unit: &ExecutionUnit) -> Option<Result<Option<Value>, Value>> {
    let (tx, rx) = bounded(16);
    unit.subscribe(move |value| {
        let _ = tx.try_send(value.clone());
    });

    let outcome = unit
        .run(json!({"steps": 1000, "interval_ms": 5}))
        .unwrap();
    rx.recv_timeout(WAIT).expect("first step");
    unit.cancel();
    outcome.wait_timeout(WAIT)
}

#[test]
fn test_cancel_mid_loop_resolves_undefined() {
    let unit = countdown_unit(None);
    assert_eq!(cancel_mid_loop(&unit), Some(Ok(None)));
    assert!(!unit.running());
}

#[test]
fn test_cancel_pooled_token() {
    let arena = TokenArena::new(4, true);
    let unit = countdown_unit(Some(arena.clone()));

    assert_eq!(unit.token().unwrap().index(), Some(0));
    assert_eq!(cancel_mid_loop(&unit), Some(Ok(None)));

    // The next run starts with a cleared flag.
    let outcome = unit.run(json!({"steps": 2, "interval_ms": 1})).unwrap();
    assert_eq!(outcome.wait_timeout(WAIT), Some(Ok(Some(json!("liftoff")))));
}

#[test]
fn test_cancel_before_run_has_no_effect() {
    let unit = countdown_unit(None);
    unit.cancel();

    let outcome = unit.run(json!({"steps": 2, "interval_ms": 1})).unwrap();
    assert_eq!(outcome.wait_timeout(WAIT), Some(Ok(Some(json!("liftoff")))));
}

#[test]
fn test_terminate_abandons_run() {
    let unit = countdown_unit(None);
    let outcome = unit.run(json!({"steps": 1000, "interval_ms": 5})).unwrap();

    unit.terminate();
    assert!(!unit.running());
    assert_eq!(outcome.wait_timeout(Duration::from_millis(200)), None);

    let next = unit.run(json!({"steps": 1, "interval_ms": 1})).unwrap();
    assert!(!next.ptr_eq(&outcome));
    assert_eq!(next.wait_timeout(WAIT), Some(Ok(Some(json!("liftoff")))));
    unit.terminate();
}

fn spinning_unit(
    ticks: Arc<AtomicUsize>,
    exited: crossbeam::channel::Sender<()>,
) -> ExecutionUnit {
    let registry = HandlerRegistry::new();
    registry.register_task("spin", move |_, helpers| {
        while !helpers.cancelled() {
            ticks.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
        }
        let _ = exited.send(());
    });
    ExecutionUnit::builder("spin")
        .registry(Arc::new(registry))
        .capabilities(Arc::new(StaticCapabilities::full()))
        .build()
        .unwrap()
}

#[test]
fn test_terminate_stops_polling_task() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let (exited_tx, exited_rx) = bounded(1);
    let unit = spinning_unit(ticks.clone(), exited_tx);

    unit.run(Value::Null).unwrap();
    while ticks.load(Ordering::SeqCst) == 0 {
        thread::yield_now();
    }
    unit.terminate();

    exited_rx.recv_timeout(WAIT).expect("task left its loop");
    let settled_ticks = ticks.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(ticks.load(Ordering::SeqCst), settled_ticks);
    assert!(!unit.token().unwrap().cancelled());
}

#[test]
fn test_dropping_unit_stops_polling_task() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let (exited_tx, exited_rx) = bounded(1);
    let unit = spinning_unit(ticks.clone(), exited_tx);

    unit.run(Value::Null).unwrap();
    while ticks.load(Ordering::SeqCst) == 0 {
        thread::yield_now();
    }
    drop(unit);

    exited_rx.recv_timeout(WAIT).expect("task left its loop");
}

#[test]
fn test_arena_capacity_is_enforced() {
    let arena = TokenArena::new(128, true);
    let units: Vec<_> = (0..128)
        .map(|_| countdown_unit(Some(arena.clone())))
        .collect();
    assert_eq!(arena.booked_count(), 128);

    let overflow = ExecutionUnit::builder("countdown")
        .registry(Arc::new(builtin_registry()))
        .capabilities(Arc::new(StaticCapabilities::full()))
        .arena(arena.clone())
        .token_mode(TokenMode::Pooled)
        .build();
    match overflow {
        Err(err @ WorkerError::CapacityExceeded { .. }) => assert_eq!(
            err.to_string(),
            "Number of cancellation tokens exceeded the admissible limit (128)"
        ),
        other => panic!("expected capacity error, got {:?}", other),
    }
    assert_eq!(arena.booked_count(), 128);

    drop(units);
    assert_eq!(arena.booked_count(), 0);
}

#[test]
fn test_global_register_and_free() {
    let token = CancellationToken::register().unwrap();
    let index = token.index().unwrap();
    assert!(TokenArena::global().is_booked(index));

    token.cancel();
    assert!(token.cancelled());
    token.free();
    assert!(!TokenArena::global().is_booked(index));
}
