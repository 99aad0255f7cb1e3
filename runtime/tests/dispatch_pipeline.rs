//! Integration tests for the dispatch pipeline
//!
//! Covers reference stability, stream ordering, listeners, reducer failures and the
//! store lifecycle.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::panic)] // Tests are allowed to panic on failures
#![allow(clippy::expect_used)] // Tests can expect

use futures::StreamExt;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storex_core::action::{Action, InvalidActionError};
use storex_core::composition::CombinedReducer;
use storex_runtime::{Command, DispatchOutcome, StoreError};
use storex_testing::assertions::{assert_changed, assert_changed_branches, assert_same_state, assert_unchanged};
use storex_testing::fixtures::{
    AppAction, COUNTER, CounterReducer, CounterState, ITEMS, ItemsReducer, act, app_builder, count, counter_builder, items,
};
use storex_testing::helpers::{ActionRecorder, wait_until, within};
use storex_testing::properties::ignored_action;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_counter_scenario() {
    let store = counter_builder().build().unwrap();
    let mut states = store.state_stream();
    let initial = store.get_state();
    assert_eq!(initial.get::<CounterState>(COUNTER), Some(&CounterState { count: 0 }));

    let outcome = store.dispatch(act(AppAction::Increment)).unwrap();
    assert_changed(&outcome);
    let after_increment = store.get_state();
    assert_eq!(count(&after_increment), 1);
    assert!(!after_increment.ptr_eq(&initial));

    let outcome = store.dispatch(act(AppAction::Unknown)).unwrap();
    assert_unchanged(&outcome);
    assert_same_state(&after_increment, &store.get_state());

    store.dispatch(act(AppAction::Set(10))).unwrap();
    assert_eq!(count(&store.get_state()), 10);

    let emitted: Vec<i64> = (&mut states).take(3).map(|state| count(&state)).collect().await;
    assert_eq!(emitted, vec![0, 1, 10]);
    assert!(within(Duration::from_millis(20), states.next()).await.is_none());
}

#[test]
fn test_only_touched_branch_is_replaced() {
    let store = app_builder().build().unwrap();
    let before = store.get_state();

    store.dispatch(act(AppAction::AddItem("milk".into()))).unwrap();

    let after = store.get_state();
    assert_changed_branches(&before, &after, &[ITEMS]);
    assert_eq!(items(&after), vec!["milk"]);
}

#[tokio::test]
async fn test_streams_preserve_dispatch_order() {
    let store = app_builder().build().unwrap();
    let recorder = ActionRecorder::start(&store);
    let states = store.state_stream();

    for payload in [AppAction::Set(1), AppAction::Unknown, AppAction::Set(2), AppAction::Set(3)] {
        store.dispatch(act(payload)).unwrap();
    }

    assert!(wait_until(Duration::from_secs(1), || recorder.actions().len() == 4).await);
    assert_eq!(recorder.types(), vec!["SET", "UNKNOWN", "SET", "SET"]);

    // the no-op is not emitted
    let counts: Vec<i64> = states.take(4).map(|state| count(&state)).collect().await;
    assert_eq!(counts, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_select_state_skips_duplicates() {
    let store = app_builder().build().unwrap();
    let counts = store.select_state(count);

    store.dispatch(act(AppAction::AddItem("a".into()))).unwrap();
    store.dispatch(act(AppAction::Increment)).unwrap();
    store.dispatch(act(AppAction::SetLoading(false))).unwrap();
    store.dispatch(act(AppAction::Increment)).unwrap();

    let seen: Vec<i64> = counts.take(3).collect().await;
    assert_eq!(seen, vec![0, 1, 2]);
}

#[test]
fn test_listeners_run_after_changes_only() {
    let store = counter_builder().build().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = store.subscribe(move |state| sink.lock().unwrap().push(count(state)));

    store.dispatch(act(AppAction::Increment)).unwrap();
    store.dispatch(act(AppAction::Unknown)).unwrap();
    store.dispatch(act(AppAction::Increment)).unwrap();
    assert!(subscription.unsubscribe());
    store.dispatch(act(AppAction::Increment)).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
}

#[test]
fn test_panicking_listener_does_not_break_dispatch() {
    let store = counter_builder().build().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _bad = store.subscribe(|_| panic!("listener bug"));
    let _good = store.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_ok!(store.dispatch(act(AppAction::Increment)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(count(&store.get_state()), 1);
}

#[test]
fn test_listener_can_dispatch() {
    let store = counter_builder().build().unwrap();
    let handle = store.clone();
    let _subscription = store.subscribe(move |state| {
        if count(state) == 1 {
            handle.dispatch(act(AppAction::Set(5))).unwrap();
        }
    });

    store.dispatch(act(AppAction::Increment)).unwrap();
    assert_eq!(count(&store.get_state()), 5);
}

#[test]
fn test_reducer_error_keeps_state() {
    let store = app_builder().build().unwrap();
    store.dispatch(act(AppAction::Increment)).unwrap();
    let before = store.get_state();

    let error = assert_err!(store.dispatch(act(AppAction::Fail("nope".into()))));

    assert_eq!(
        error,
        StoreError::ReducerExecution {
            branch: COUNTER.to_string(),
            action_type: "FAIL".to_string(),
            message: "nope".to_string(),
        }
    );
    assert_same_state(&before, &store.get_state());
}

#[test]
fn test_invalid_action_is_rejected() {
    let store = counter_builder().build().unwrap();
    let padded = serde_json::from_str::<Action<AppAction>>(
        r#"{"type":" SET ","timestamp":0,"id":"0-x","payload":{"Set":3}}"#,
    )
    .unwrap();

    let error = assert_err!(store.dispatch(padded));
    assert!(matches!(error, StoreError::InvalidAction(InvalidActionError::PaddedType(_))));
    assert_eq!(count(&store.get_state()), 0);
}

#[test]
fn test_command_without_thunk_is_rejected() {
    let store = counter_builder().build().unwrap();
    let command: Command<AppAction> = Command::sync("noop", |_api| Ok(()));

    let error = assert_err!(store.dispatch(command));
    assert_eq!(error, StoreError::InvalidAction(InvalidActionError::UnhandledCommand));
}

#[test]
fn test_replace_reducer_keeps_surviving_branches() {
    let store = counter_builder().build().unwrap();
    store.dispatch(act(AppAction::Set(7))).unwrap();
    let before = store.get_state();

    store
        .replace_reducer(CombinedReducer::new().branch(COUNTER, CounterReducer).branch(ITEMS, ItemsReducer))
        .unwrap();

    let after = store.get_state();
    assert_eq!(count(&after), 7);
    assert!(before.branch_ptr_eq(&after, COUNTER));
    assert!(items(&after).is_empty());
    assert_eq!(store.replace_reducer(CombinedReducer::new()), Err(StoreError::NoReducers));
}

#[test]
fn test_replace_reducer_with_same_keys_is_silent() {
    let store = counter_builder().build().unwrap();
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    let _subscription = store.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let before = store.get_state();

    store.replace_reducer(CombinedReducer::new().branch(COUNTER, CounterReducer)).unwrap();

    assert_eq!(notified.load(Ordering::SeqCst), 0);
    assert!(before.branch_ptr_eq(&store.get_state(), COUNTER));
}

#[tokio::test]
async fn test_destroy_completes_streams_and_rejects_dispatch() {
    let store = counter_builder().build().unwrap();
    let recorder = ActionRecorder::start(&store);
    let mut states = store.state_stream();
    assert!(states.next().await.is_some());

    store.destroy();
    store.destroy();

    assert!(store.is_destroyed());
    assert_eq!(store.dispatch(act(AppAction::Increment)), Err(StoreError::Destroyed));
    assert!(within(Duration::from_secs(1), states.next()).await.unwrap().is_none());
    assert!(wait_until(Duration::from_secs(1), || recorder.is_finished()).await);

    let info = store.info();
    assert!(info.destroyed);
    assert!(!info.has_active_subscriptions);
}

#[test]
fn test_info_reports_configuration() {
    let store = app_builder().build().unwrap();
    let info = store.info();

    assert_eq!(info.name, "storex");
    assert_eq!(info.middleware_count, 0);
    assert_eq!(info.effects_count, 0);
    assert_eq!(info.current_state.len(), 2);
    assert!(!info.destroyed);
}

proptest! {
    #[test]
    fn prop_ignored_actions_keep_reference(actions in proptest::collection::vec(ignored_action(), 1..30)) {
        let store = app_builder().build().unwrap();
        store.dispatch(act(AppAction::Increment)).unwrap();
        let before = store.get_state();

        for payload in actions {
            let outcome = store.dispatch(act(payload)).unwrap();
            prop_assert_eq!(outcome, DispatchOutcome::Applied { changed: false });
        }

        prop_assert!(before.ptr_eq(&store.get_state()));
    }
}
