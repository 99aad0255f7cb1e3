//! Integration tests for the middleware chain and the built-in middleware

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::panic)] // Tests are allowed to panic on failures
#![allow(clippy::expect_used)] // Tests can expect

use std::sync::{Arc, Mutex};
use std::time::Duration;
use storex_core::action::Action;
use storex_core::reducer::reducer_fn;
use storex_runtime::middleware::{
    ActionTiming, ErrorHandlingMiddleware, LoggingMiddleware, PerformanceMiddleware, PerformanceOptions, ThunkMiddleware,
};
use storex_runtime::{Command, DispatchOutcome, StoreBuilder, StoreError};
use storex_testing::fixtures::{AppAction, CounterReducer, act, count, counter_builder};
use storex_testing::helpers::wait_until;
use storex_testing::mocks::{HookLog, RecordingMiddleware};
use tokio_test::{assert_err, assert_ok};

fn traced_builder(log: &HookLog) -> StoreBuilder<AppAction> {
    let reducer_log = log.clone();
    counter_builder()
        .register_reducer(
            "trace",
            reducer_fn(0_u8, move |_state, _action: &Action<AppAction>| {
                reducer_log.push("reducer");
                Ok(())
            }),
        )
        .apply_middleware(RecordingMiddleware::new("A", log))
        .apply_middleware(RecordingMiddleware::new("B", log))
}

#[test]
fn test_first_registered_middleware_is_outermost() {
    let log = HookLog::new();
    let store = traced_builder(&log).build().unwrap();

    store.dispatch(act(AppAction::Increment)).unwrap();

    assert_eq!(log.entries(), vec!["A.before", "B.before", "reducer", "B.after", "A.after"]);
}

#[test]
fn test_errors_unwind_innermost_first() {
    let log = HookLog::new();
    let store = traced_builder(&log).build().unwrap();

    assert_err!(store.dispatch(act(AppAction::Fail("bad".into()))));

    // the counter branch fails before the trace branch runs
    assert_eq!(log.entries(), vec!["A.before", "B.before", "B.error", "A.error"]);
}

#[test]
fn test_added_middleware_is_innermost_and_removable() {
    let log = HookLog::new();
    let store = counter_builder()
        .apply_middleware(RecordingMiddleware::new("A", &log))
        .build()
        .unwrap();
    store.add_middleware(RecordingMiddleware::new("C", &log)).unwrap();

    store.dispatch(act(AppAction::Increment)).unwrap();
    assert_eq!(log.entries(), vec!["A.before", "C.before", "C.after", "A.after"]);

    log.clear();
    assert!(store.remove_middleware("C"));
    assert!(!store.remove_middleware("C"));
    store.dispatch(act(AppAction::Increment)).unwrap();
    assert_eq!(log.entries(), vec!["C.teardown", "A.before", "A.after"]);
}

#[test]
fn test_duplicate_middleware_names_are_rejected() {
    let log = HookLog::new();
    let built = counter_builder()
        .apply_middleware(RecordingMiddleware::new("A", &log))
        .apply_middleware(RecordingMiddleware::new("A", &log))
        .build();
    assert!(matches!(built, Err(StoreError::MiddlewareConfig(_))));

    let store = counter_builder()
        .apply_middleware(RecordingMiddleware::new("A", &log))
        .build()
        .unwrap();
    assert!(matches!(
        store.add_middleware(RecordingMiddleware::new("A", &log)),
        Err(StoreError::MiddlewareConfig(_))
    ));
}

#[test]
fn test_destroy_tears_down_middleware() {
    let log = HookLog::new();
    let store = counter_builder()
        .apply_middleware(RecordingMiddleware::new("A", &log))
        .build()
        .unwrap();

    store.destroy();
    store.destroy();

    assert_eq!(log.entries(), vec!["A.teardown"]);
}

#[test]
fn test_middleware_can_redispatch_through_api() {
    let store = counter_builder().apply_middleware(ThunkMiddleware::new()).build().unwrap();

    let outcome = store
        .dispatch(Command::<AppAction>::sync("increment-twice", |api| {
            api.dispatch(act(AppAction::Increment))?;
            api.dispatch(act(AppAction::Increment))?;
            assert_eq!(count(&api.get_state()), 2);
            Ok(())
        }))
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Executed);
    assert_eq!(count(&store.get_state()), 2);
}

#[test]
fn test_sync_command_error_reaches_caller() {
    let store = counter_builder().apply_middleware(ThunkMiddleware::new()).build().unwrap();

    let error = assert_err!(store.dispatch(Command::<AppAction>::sync("fails", |api| {
        api.dispatch(act(AppAction::Fail("inner".into())))?;
        Ok(())
    })));

    assert!(matches!(error, StoreError::ReducerExecution { .. }));
}

#[tokio::test]
async fn test_async_command_runs_on_runtime() {
    let store = counter_builder().apply_middleware(ThunkMiddleware::new()).build().unwrap();

    let outcome = store
        .dispatch(Command::<AppAction>::future("load", |api| async move {
            tokio::task::yield_now().await;
            api.dispatch(act(AppAction::Set(42)))?;
            Ok::<(), StoreError>(())
        }))
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Deferred);
    assert!(wait_until(Duration::from_secs(1), || count(&store.get_state()) == 42).await);
}

#[test]
fn test_async_command_without_runtime_fails() {
    let store = counter_builder().apply_middleware(ThunkMiddleware::new()).build().unwrap();

    let error = assert_err!(store.dispatch(Command::<AppAction>::future("load", |_api| async { Ok(()) })));

    assert!(matches!(error, StoreError::RuntimeUnavailable(_)));
}

#[test]
fn test_error_handler_rethrows_and_reports() {
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reported);
    let store = counter_builder()
        .apply_middleware(ErrorHandlingMiddleware::<AppAction>::rethrowing().on_error(move |record| {
            sink.lock().unwrap().push((record.label.clone(), record.message.clone()));
        }))
        .build()
        .unwrap();

    assert_err!(store.dispatch(act(AppAction::Fail("broken".into()))));

    let reported = reported.lock().unwrap();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].0, "FAIL");
    assert!(reported[0].1.contains("broken"));
}

#[test]
fn test_error_handler_recovers_without_dispatching() {
    let store = counter_builder()
        .apply_middleware(ErrorHandlingMiddleware::<AppAction>::recovering(|record| {
            record.action.as_ref().map(|_| act(AppAction::Set(0)))
        }))
        .build()
        .unwrap();
    store.dispatch(act(AppAction::Increment)).unwrap();

    let outcome = store.dispatch(act(AppAction::Fail("broken".into()))).unwrap();

    match outcome {
        DispatchOutcome::Recovered(Some(recovery)) => assert!(recovery.is("SET")),
        other => panic!("expected a recovery action, got {other:?}"),
    }
    // the recovery action is only proposed
    assert_eq!(count(&store.get_state()), 1);
}

#[test]
fn test_error_handler_never_swallows_invalid_input() {
    let store = counter_builder()
        .apply_middleware(ErrorHandlingMiddleware::<AppAction>::recovering(|_| None))
        .build()
        .unwrap();

    let error = assert_err!(store.dispatch(Command::<AppAction>::sync("stray", |_api| Ok(()))));

    assert!(error.is_fatal());
}

#[test]
fn test_logging_middleware_is_transparent() {
    let store = counter_builder()
        .apply_middleware(LoggingMiddleware::default())
        .apply_middleware(LoggingMiddleware::only(["SET"]))
        .build();

    // both are named "logging"
    assert!(matches!(store, Err(StoreError::MiddlewareConfig(_))));

    let store = counter_builder()
        .apply_middleware(LoggingMiddleware::default())
        .build()
        .unwrap();
    assert_ok!(store.dispatch(act(AppAction::Set(3))));
    assert_err!(store.dispatch(act(AppAction::Fail("x".into()))));
    assert_eq!(count(&store.get_state()), 3);
}

#[test]
fn test_performance_middleware_reports_slow_dispatches() {
    let slow = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&slow);
    let store = StoreBuilder::new()
        .register_reducer("counter", CounterReducer)
        .register_reducer(
            "sleepy",
            reducer_fn(0_u8, |_state, action: &Action<AppAction>| {
                if action.is("SET") {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            }),
        )
        .apply_middleware(PerformanceMiddleware::with_threshold(Duration::from_millis(2), move |timing| {
            sink.lock().unwrap().push(timing.action_type.clone());
        }))
        .build()
        .unwrap();

    store.dispatch(act(AppAction::Increment)).unwrap();
    store.dispatch(act(AppAction::Set(9))).unwrap();

    assert_eq!(*slow.lock().unwrap(), vec!["SET"]);
}

#[test]
fn test_performance_middleware_records_all_when_asked() {
    let timings = Arc::new(Mutex::new(0_usize));
    let sink = Arc::clone(&timings);
    let store = counter_builder()
        .apply_middleware(PerformanceMiddleware::new(PerformanceOptions {
            record_all: true,
            on_metrics: Some(Arc::new(move |_: &ActionTiming| *sink.lock().unwrap() += 1)),
            ..PerformanceOptions::default()
        }))
        .build()
        .unwrap();

    store.dispatch(act(AppAction::Increment)).unwrap();
    store.dispatch(act(AppAction::Unknown)).unwrap();

    assert_eq!(*timings.lock().unwrap(), 2);
}
