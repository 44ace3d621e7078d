//! 执行单元单元测试
//!
//! 用脚本化的上下文工厂代替真实线程，由测试代替任务发送消息

use crate::runtime::cancel::{TokenArena, TokenMode};
use crate::runtime::errors::WorkerError;
use crate::runtime::isolation::StaticCapabilities;
use crate::runtime::protocol::{InitMessage, WorkerMessage};
use crate::runtime::script::{HandlerRegistry, TaskScript};
use crate::runtime::unit::{
    ContextFactory, ExecutionContext, ExecutionUnit, Outcome, Spawned, ThreadContextFactory,
};
use crate::runtime::errors::WorkerResult;
use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);
const SHORT: Duration = Duration::from_millis(100);

/// The test's end of one spawned context.
struct Link {
    script: TaskScript,
    outbox: Sender<Value>,
    init: Arc<Mutex<Option<InitMessage>>>,
    terminated: Arc<AtomicBool>,
}

impl Link {
    fn send(
        &self,
        message: WorkerMessage,
    ) {
        self.outbox.send(message.encode()).unwrap();
    }

    fn init_data(&self) -> Value {
        self.init.lock().as_ref().expect("init posted").data.clone()
    }
}

struct ScriptedContext {
    init: Arc<Mutex<Option<InitMessage>>>,
    terminated: Arc<AtomicBool>,
    reject_init: bool,
}

impl ExecutionContext for ScriptedContext {
    fn post(
        &mut self,
        message: InitMessage,
    ) -> WorkerResult<()> {
        if self.reject_init {
            return Err(WorkerError::ContextClosed);
        }
        *self.init.lock() = Some(message);
        Ok(())
    }

    fn terminate(&mut self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct ScriptedFactory {
    unsupported: bool,
    /// Contexts spawned while set refuse the initial message.
    reject_init: AtomicBool,
    spawned: AtomicUsize,
    links: Mutex<Vec<Arc<Link>>>,
}

impl ScriptedFactory {
    fn link(
        &self,
        index: usize,
    ) -> Arc<Link> {
        self.links.lock()[index].clone()
    }

    fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

impl ContextFactory for ScriptedFactory {
    fn is_supported(&self) -> bool {
        !self.unsupported
    }

    fn spawn(
        &self,
        script: &TaskScript,
    ) -> WorkerResult<Spawned> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let (outbox, inbox) = unbounded();
        let init = Arc::new(Mutex::new(None));
        let terminated = Arc::new(AtomicBool::new(false));
        self.links.lock().push(Arc::new(Link {
            script: script.clone(),
            outbox,
            init: init.clone(),
            terminated: terminated.clone(),
        }));
        Ok(Spawned {
            context: Box::new(ScriptedContext {
                init,
                terminated,
                reject_init: self.reject_init.load(Ordering::SeqCst),
            }),
            inbox,
        })
    }
}

fn scripted_unit() -> (ExecutionUnit, Arc<ScriptedFactory>) {
    let factory = Arc::new(ScriptedFactory::default());
    let unit = ExecutionUnit::builder("task")
        .factory(factory.clone())
        .capabilities(Arc::new(StaticCapabilities::full()))
        .build()
        .unwrap();
    (unit, factory)
}

fn settled(outcome: &Outcome) -> Option<Result<Option<Value>, Value>> {
    outcome.wait_timeout(WAIT)
}

#[cfg(test)]
mod run_tests {
    use super::*;

    #[test]
    fn test_pending_run_returns_same_outcome() {
        let (unit, factory) = scripted_unit();

        let first = unit.run(json!(1)).unwrap();
        let second = unit.run(json!(2)).unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(factory.spawned(), 1);
        assert_eq!(factory.link(0).init_data(), json!(1));
    }

    #[test]
    fn test_running_transitions() {
        let (unit, factory) = scripted_unit();
        assert!(!unit.running());

        let outcome = unit.run(Value::Null).unwrap();
        assert!(unit.running());

        factory.link(0).send(WorkerMessage::Done { value: Some(json!(42)) });
        assert_eq!(settled(&outcome), Some(Ok(Some(json!(42)))));
        assert!(!unit.running());
    }

    #[test]
    fn test_new_run_after_settlement_spawns_again() {
        let (unit, factory) = scripted_unit();

        let first = unit.run(json!(1)).unwrap();
        factory.link(0).send(WorkerMessage::Done { value: None });
        assert_eq!(settled(&first), Some(Ok(None)));

        let second = unit.run(json!(2)).unwrap();
        assert!(!first.ptr_eq(&second));
        assert_eq!(factory.spawned(), 2);
        assert_eq!(factory.link(1).init_data(), json!(2));
    }

    #[test]
    fn test_failed_start_cannot_settle_next_run() {
        let (unit, factory) = scripted_unit();

        factory.reject_init.store(true, Ordering::SeqCst);
        assert!(matches!(unit.run(json!(1)), Err(WorkerError::ContextClosed)));
        assert!(!unit.running());
        assert!(factory.link(0).terminated.load(Ordering::SeqCst));

        factory.reject_init.store(false, Ordering::SeqCst);
        let outcome = unit.run(json!(2)).unwrap();
        assert_eq!(factory.spawned(), 2);

        factory.link(0).send(WorkerMessage::Done { value: Some(json!("stale")) });
        std::thread::sleep(SHORT);
        assert!(!outcome.is_settled());
        assert!(unit.running());

        factory.link(1).send(WorkerMessage::Done { value: Some(json!("fresh")) });
        assert_eq!(settled(&outcome), Some(Ok(Some(json!("fresh")))));
    }

    #[test]
    fn test_cancelled_resolves_undefined() {
        let (unit, factory) = scripted_unit();
        let outcome = unit.run(Value::Null).unwrap();

        factory.link(0).send(WorkerMessage::Cancelled {});
        assert_eq!(settled(&outcome), Some(Ok(None)));
    }

    #[test]
    fn test_error_rejects_with_same_value() {
        let (unit, factory) = scripted_unit();
        let outcome = unit.run(Value::Null).unwrap();

        let error = json!({"message": "boom", "code": 7});
        factory.link(0).send(WorkerMessage::Error { error: error.clone() });
        assert_eq!(settled(&outcome), Some(Err(error)));
    }

    #[test]
    fn test_messages_after_terminal_ignored() {
        let (unit, factory) = scripted_unit();
        let outcome = unit.run(Value::Null).unwrap();
        let link = factory.link(0);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        unit.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        link.send(WorkerMessage::Done { value: Some(json!("first")) });
        link.send(WorkerMessage::Error { error: json!("second") });
        link.send(WorkerMessage::Next { value: json!("late") });

        assert_eq!(settled(&outcome), Some(Ok(Some(json!("first")))));
        std::thread::sleep(SHORT);
        assert_eq!(outcome.try_result(), Some(Ok(Some(json!("first")))));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}

#[cfg(test)]
mod observer_tests {
    use super::*;

    #[test]
    fn test_progress_and_next_observers() {
        let (unit, factory) = scripted_unit();
        let progress = Arc::new(Mutex::new(Vec::new()));
        let next = Arc::new(Mutex::new(Vec::new()));

        let sink = progress.clone();
        unit.progress(move |value| sink.lock().push(value.clone()));
        let sink = next.clone();
        unit.subscribe(move |value| sink.lock().push(value.clone()));

        let outcome = unit.run(Value::Null).unwrap();
        let link = factory.link(0);
        link.send(WorkerMessage::Progress { value: json!(10) });
        link.send(WorkerMessage::Next { value: json!("a") });
        link.send(WorkerMessage::Next { value: json!("b") });
        link.send(WorkerMessage::Done { value: Some(json!("ok")) });

        assert_eq!(settled(&outcome), Some(Ok(Some(json!("ok")))));
        assert_eq!(*progress.lock(), vec![json!(10)]);
        assert_eq!(*next.lock(), vec![json!("a"), json!("b")]);
    }

    #[test]
    fn test_observer_replaced() {
        let (unit, factory) = scripted_unit();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let sink = hits.clone();
        unit.progress(move |_| sink.lock().push("old"));
        let sink = hits.clone();
        unit.progress(move |_| sink.lock().push("new"));

        let outcome = unit.run(Value::Null).unwrap();
        factory.link(0).send(WorkerMessage::Progress { value: json!(1) });
        factory.link(0).send(WorkerMessage::Done { value: None });
        settled(&outcome);

        assert_eq!(*hits.lock(), vec!["new"]);
    }

    #[test]
    fn test_malformed_messages_ignored() {
        let (unit, factory) = scripted_unit();
        let outcome = unit.run(Value::Null).unwrap();
        let link = factory.link(0);

        link.outbox.send(json!("done")).unwrap();
        link.outbox.send(json!({"type": "finished", "value": 1})).unwrap();
        link.outbox.send(json!({"value": 1})).unwrap();
        std::thread::sleep(SHORT);
        assert!(!outcome.is_settled());
        assert!(unit.running());

        link.send(WorkerMessage::Done { value: Some(json!(1)) });
        assert_eq!(settled(&outcome), Some(Ok(Some(json!(1)))));
    }
}

#[cfg(test)]
mod control_tests {
    use super::*;

    #[test]
    fn test_cancel_without_context_is_noop() {
        let (unit, _factory) = scripted_unit();
        unit.cancel();
        assert!(!unit.token().unwrap().cancelled());
    }

    #[test]
    fn test_cancel_reaches_context_flag() {
        let (unit, factory) = scripted_unit();
        unit.run(Value::Null).unwrap();

        unit.cancel();
        let link = factory.link(0);
        let init = link.init.lock();
        let handle = init.as_ref().unwrap().cancellation.clone().unwrap();
        assert!(handle.cancelled());
    }

    #[test]
    fn test_run_resets_flag() {
        let (unit, factory) = scripted_unit();
        let first = unit.run(Value::Null).unwrap();
        unit.cancel();
        factory.link(0).send(WorkerMessage::Cancelled {});
        settled(&first);
        assert!(unit.token().unwrap().cancelled());

        unit.run(Value::Null).unwrap();
        assert!(!unit.token().unwrap().cancelled());
    }

    #[test]
    fn test_terminate_abandons_outcome() {
        let (unit, factory) = scripted_unit();
        let outcome = unit.run(Value::Null).unwrap();
        let link = factory.link(0);

        unit.terminate();
        assert!(link.terminated.load(Ordering::SeqCst));
        assert!(!unit.running());

        let _ = link.outbox.send(WorkerMessage::Done { value: Some(json!(1)) }.encode());
        assert_eq!(outcome.wait_timeout(SHORT), None);
    }

    #[test]
    fn test_terminate_keeps_token() {
        let arena = TokenArena::new(4, true);
        let factory = Arc::new(ScriptedFactory::default());
        let unit = ExecutionUnit::builder("task")
            .factory(factory.clone())
            .capabilities(Arc::new(StaticCapabilities::full()))
            .arena(arena.clone())
            .token_mode(TokenMode::Pooled)
            .build()
            .unwrap();

        unit.run(Value::Null).unwrap();
        unit.terminate();
        assert_eq!(arena.booked_count(), 1);
        assert!(!unit.token().unwrap().is_freed());

        let outcome = unit.run(json!("again")).unwrap();
        factory.link(1).send(WorkerMessage::Done { value: Some(json!("again")) });
        assert_eq!(settled(&outcome), Some(Ok(Some(json!("again")))));

        drop(unit);
        assert_eq!(arena.booked_count(), 0);
    }

    #[test]
    fn test_drop_terminates_active_context() {
        let arena = TokenArena::new(4, true);
        let factory = Arc::new(ScriptedFactory::default());
        let unit = ExecutionUnit::builder("task")
            .factory(factory.clone())
            .capabilities(Arc::new(StaticCapabilities::full()))
            .arena(arena.clone())
            .token_mode(TokenMode::Pooled)
            .build()
            .unwrap();

        let outcome = unit.run(Value::Null).unwrap();
        let link = factory.link(0);
        drop(unit);

        assert!(link.terminated.load(Ordering::SeqCst));
        assert_eq!(arena.booked_count(), 0);
        let _ = link.outbox.send(WorkerMessage::Done { value: Some(json!(1)) }.encode());
        assert_eq!(outcome.wait_timeout(SHORT), None);
    }

    #[test]
    fn test_terminate_all() {
        let (first, first_factory) = scripted_unit();
        let (second, second_factory) = scripted_unit();
        first.run(Value::Null).unwrap();
        second.run(Value::Null).unwrap();

        ExecutionUnit::terminate_all([&first, &second]);

        assert!(!first.running());
        assert!(!second.running());
        assert!(first_factory.link(0).terminated.load(Ordering::SeqCst));
        assert!(second_factory.link(0).terminated.load(Ordering::SeqCst));
    }

    #[test]
    fn test_inject_dedupes_into_next_script() {
        let (mut unit, factory) = scripted_unit();
        assert_eq!(unit.inject(["square", "cube"]), 2);
        assert_eq!(unit.inject(["square"]), 0);

        unit.run(Value::Null).unwrap();
        let script = &factory.link(0).script;
        assert_eq!(script.injected().len(), 2);
        assert_eq!(script.injected()[0].as_str(), "square");
    }
}

#[cfg(test)]
mod construction_tests {
    use super::*;

    #[test]
    fn test_unsupported_factory() {
        let factory = Arc::new(ScriptedFactory {
            unsupported: true,
            ..Default::default()
        });
        let result = ExecutionUnit::builder("task").factory(factory).build();
        assert!(matches!(result, Err(WorkerError::UnsupportedContext)));
    }

    #[test]
    fn test_unsupported_environment() {
        let capabilities = StaticCapabilities {
            shared_memory: true,
            contexts: false,
        };
        let result = ExecutionUnit::builder("task")
            .factory(Arc::new(ScriptedFactory::default()))
            .capabilities(Arc::new(capabilities))
            .build();
        assert!(matches!(result, Err(WorkerError::UnsupportedContext)));
    }

    #[test]
    fn test_degraded_unit_has_no_token() {
        let factory = Arc::new(ScriptedFactory::default());
        let unit = ExecutionUnit::builder("task")
            .factory(factory.clone())
            .capabilities(Arc::new(StaticCapabilities::degraded()))
            .build()
            .unwrap();
        assert!(unit.token().is_none());

        unit.run(Value::Null).unwrap();
        unit.cancel();
        assert!(factory.link(0).init.lock().as_ref().unwrap().cancellation.is_none());
    }

    #[test]
    fn test_pooled_capacity_exceeded() {
        let arena = TokenArena::new(1, true);
        let build = || {
            ExecutionUnit::builder("task")
                .factory(Arc::new(ScriptedFactory::default()))
                .capabilities(Arc::new(StaticCapabilities::full()))
                .arena(arena.clone())
                .token_mode(TokenMode::Pooled)
                .build()
        };

        let first = build().unwrap();
        assert_eq!(first.token().unwrap().index(), Some(0));
        assert!(matches!(build(), Err(WorkerError::CapacityExceeded { limit: 1 })));
    }

    #[test]
    fn test_thread_factory_end_to_end() {
        let registry = HandlerRegistry::new();
        registry.register_task("double", |data: Value, _| json!(data.as_i64().unwrap_or(0) * 2));
        let registry = Arc::new(registry);

        let factory = Arc::new(ThreadContextFactory::new(registry));
        let unit = ExecutionUnit::builder("double")
            .factory(factory.clone())
            .capabilities(Arc::new(StaticCapabilities::full()))
            .build()
            .unwrap();

        let outcome = unit.run(json!(21)).unwrap();
        assert_eq!(settled(&outcome), Some(Ok(Some(json!(42)))));
        assert_eq!(factory.spawned_count(), 1);
    }
}
