//! # Storex Testing
//!
//! Testing utilities and helpers for Storex stores.
//!
//! This crate provides:
//! - Fixture reducers and actions shared by the test suites
//! - Mock middleware and capability probes
//! - Async helpers for waiting on stores
//! - Property-based testing strategies
//! - Assertion helpers for reducers and stores
//!
//! ## Example
//!
//! ```ignore
//! use storex_testing::fixtures::{act, app_builder, count, AppAction};
//! use storex_testing::mocks::{HookLog, RecordingMiddleware};
//!
//! #[tokio::test]
//! async fn test_increment() {
//!     let log = HookLog::new();
//!     let store = app_builder()
//!         .apply_middleware(RecordingMiddleware::new("A", &log))
//!         .build()
//!         .unwrap();
//!
//!     store.dispatch(act(AppAction::Increment)).unwrap();
//!
//!     assert_eq!(count(&store.get_state()), 1);
//!     assert_eq!(log.entries(), vec!["A.before", "A.after"]);
//! }
//! ```

pub mod fixtures;

pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations for testing.
pub mod mocks {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use storex_core::action::ActionPayload;
    use storex_core::environment::{CapabilityProbe, RuntimeEnvironment};
    use storex_core::sync::lock;
    use storex_runtime::middleware::{MiddlewareApi, Next};
    use storex_runtime::{DispatchResult, Dispatchable, Middleware};

    /// Shared, ordered record of hook invocations.
    #[derive(Debug, Clone, Default)]
    pub struct HookLog {
        entries: Arc<Mutex<Vec<String>>>,
    }

    impl HookLog {
        /// An empty log.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Append an entry.
        pub fn push(&self, entry: impl Into<String>) {
            lock(&self.entries).push(entry.into());
        }

        /// Everything recorded so far.
        #[must_use]
        pub fn entries(&self) -> Vec<String> {
            lock(&self.entries).clone()
        }

        /// Forget everything recorded so far.
        pub fn clear(&self) {
            lock(&self.entries).clear();
        }
    }

    /// Middleware that records `{name}.before`, `{name}.after` and `{name}.error`.
    ///
    /// # Example
    ///
    /// ```
    /// use storex_testing::mocks::{HookLog, RecordingMiddleware};
    ///
    /// let log = HookLog::new();
    /// let outer = RecordingMiddleware::new("A", &log);
    /// let inner = RecordingMiddleware::new("B", &log);
    /// # let _ = (outer, inner);
    /// ```
    #[derive(Debug, Clone)]
    pub struct RecordingMiddleware {
        name: String,
        log: HookLog,
    }

    impl RecordingMiddleware {
        /// Record into `log` under `name`.
        #[must_use]
        pub fn new(name: impl Into<String>, log: &HookLog) -> Self {
            Self {
                name: name.into(),
                log: log.clone(),
            }
        }
    }

    impl<P: ActionPayload> Middleware<P> for RecordingMiddleware {
        fn name(&self) -> &str {
            &self.name
        }

        fn handle(&self, _api: &MiddlewareApi<P>, input: Dispatchable<P>, next: &Next<P>) -> DispatchResult<P> {
            self.log.push(format!("{}.before", self.name));
            let result = next.call(input);
            match &result {
                Ok(_) => self.log.push(format!("{}.after", self.name)),
                Err(_) => self.log.push(format!("{}.error", self.name)),
            }
            result
        }

        fn teardown(&self) {
            self.log.push(format!("{}.teardown", self.name));
        }
    }

    /// Capability probe whose pull support can be switched at runtime.
    #[derive(Debug, Clone)]
    pub struct ToggleProbe {
        environment: RuntimeEnvironment,
        pull_capable: Arc<AtomicBool>,
    }

    impl ToggleProbe {
        /// A test-environment probe with the given initial pull support.
        #[must_use]
        pub fn new(pull_capable: bool) -> Self {
            Self {
                environment: RuntimeEnvironment::Test,
                pull_capable: Arc::new(AtomicBool::new(pull_capable)),
            }
        }

        /// Switch pull support; clones share the flag.
        pub fn set_pull_capable(&self, pull_capable: bool) {
            self.pull_capable.store(pull_capable, Ordering::Release);
        }
    }

    impl CapabilityProbe for ToggleProbe {
        fn environment(&self) -> RuntimeEnvironment {
            self.environment
        }

        fn is_pull_capable(&self) -> bool {
            self.pull_capable.load(Ordering::Acquire)
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use futures::StreamExt;
    use std::future::Future;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use storex_core::action::{Action, ActionPayload};
    use storex_core::sync::lock;
    use storex_runtime::Store;
    use tokio::task::JoinHandle;

    /// Install a test-friendly `tracing` subscriber. Safe to call more than once.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    /// Poll `condition` every millisecond until it holds or `timeout` elapses.
    ///
    /// Returns whether the condition held. Works with paused Tokio time.
    pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Await `future`, failing with `None` after `timeout`.
    pub async fn within<F: Future>(timeout: Duration, future: F) -> Option<F::Output> {
        tokio::time::timeout(timeout, future).await.ok()
    }

    /// Records every action a store publishes, from the moment it is created.
    #[derive(Debug)]
    pub struct ActionRecorder<P> {
        actions: Arc<Mutex<Vec<Action<P>>>>,
        task: JoinHandle<()>,
    }

    impl<P: ActionPayload> ActionRecorder<P> {
        /// Start recording `store`'s action stream. Needs a Tokio runtime.
        #[must_use]
        pub fn start(store: &Store<P>) -> Self {
            let mut stream = store.action_stream();
            let actions = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&actions);
            let task = tokio::spawn(async move {
                while let Some(action) = stream.next().await {
                    lock(&sink).push(action);
                }
            });
            Self { actions, task }
        }

        /// Recorded actions.
        #[must_use]
        pub fn actions(&self) -> Vec<Action<P>> {
            lock(&self.actions).clone()
        }

        /// Recorded action types.
        #[must_use]
        pub fn types(&self) -> Vec<String> {
            lock(&self.actions)
                .iter()
                .map(|action| action.action_type().to_string())
                .collect()
        }

        /// Number of recorded actions of `action_type`.
        #[must_use]
        pub fn count_of(&self, action_type: &str) -> usize {
            lock(&self.actions).iter().filter(|action| action.is(action_type)).count()
        }

        /// Whether the store's action stream has ended.
        #[must_use]
        pub fn is_finished(&self) -> bool {
            self.task.is_finished()
        }
    }

    impl<P> Drop for ActionRecorder<P> {
        fn drop(&mut self) {
            self.task.abort();
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use crate::fixtures::AppAction;
    use proptest::prelude::*;

    /// Any fixture action except `FAIL`.
    pub fn app_action() -> impl Strategy<Value = AppAction> {
        prop_oneof![
            Just(AppAction::Increment),
            Just(AppAction::Decrement),
            (-100i64..100).prop_map(AppAction::Set),
            "[a-z]{1,8}".prop_map(AppAction::AddItem),
            any::<bool>().prop_map(AppAction::SetLoading),
            "[a-z]{0,8}".prop_map(AppAction::Search),
            Just(AppAction::Unknown),
        ]
    }

    /// Actions that no fixture reducer handles.
    pub fn ignored_action() -> impl Strategy<Value = AppAction> {
        prop_oneof![
            "[a-z]{0,8}".prop_map(AppAction::Search),
            Just(AppAction::Unknown),
        ]
    }
}
