//! # Storex Core
//!
//! Core traits and types for the Storex reactive state container.
//!
//! This crate holds everything that does not need an async runtime: actions, the
//! copy-on-write draft, the reducer trait, keyed reducer composition, the immutable
//! state tree and the pull-based reactive primitives the store projects state into.
//!
//! ## Core Concepts
//!
//! - **Action**: Immutable `{type, timestamp, id, payload}` record of an intended change
//! - **Reducer**: Pure `(Draft<State>, Action) → ()` transition; untouched drafts keep
//!   their reference
//! - **`CombinedReducer`**: Keyed branches reduced independently into a [`StateTree`]
//! - **`PullCell`**: Synchronously readable reactive cell, fed from state changes
//! - **`CapabilityProbe`**: Tells the store whether pull cells are supported
//!
//! ## Architecture Principles
//!
//! - Unidirectional Data Flow
//! - Structural Sharing (reference identity means "unchanged")
//! - Explicit Instances (logger, probe and caches are passed in, never global)
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use storex_core::action::Action;
//! use storex_core::composition::CombinedReducer;
//! use storex_core::draft::Draft;
//! use storex_core::reducer::{Reducer, ReducerError};
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Counter { count: i64 }
//!
//! #[derive(Clone, Debug)]
//! enum CounterAction { Increment, Noop }
//!
//! struct CounterReducer;
//!
//! impl Reducer for CounterReducer {
//!     type State = Counter;
//!     type Action = CounterAction;
//!
//!     fn initial_state(&self) -> Option<Counter> {
//!         Some(Counter { count: 0 })
//!     }
//!
//!     fn reduce(
//!         &self,
//!         state: &mut Draft<Counter>,
//!         action: &Action<CounterAction>,
//!     ) -> Result<(), ReducerError> {
//!         if let CounterAction::Increment = action.payload() {
//!             state.count += 1;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let combined = CombinedReducer::new().branch("counter", CounterReducer);
//! let s0 = combined.initial_state().unwrap();
//!
//! let noop = Action::new("NOOP", CounterAction::Noop).unwrap();
//! let s1 = combined.reduce(&s0, &noop).unwrap().state;
//! assert!(s1.ptr_eq(&s0));
//!
//! let increment = Action::new("INCREMENT", CounterAction::Increment).unwrap();
//! let s2 = combined.reduce(&s1, &increment).unwrap().state;
//! assert_eq!(s2.get::<Counter>("counter"), Some(&Counter { count: 1 }));
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod action;
pub mod composition;
pub mod draft;
pub mod logger;
pub mod reactive;
pub mod selector;
pub mod state;
pub mod sync;

pub use action::{Action, ActionCreator, ActionFilter, ActionKind, ActionPayload, ActionType};
pub use composition::CombinedReducer;
pub use draft::Draft;
pub use reducer::{Reducer, ReducerError};
pub use state::StateTree;

/// Reducer module - The core trait for state transitions
///
/// Reducers are pure: `(Draft<State>, Action) → ()`. They mutate the draft they are
/// handed and never see the store, so they cannot dispatch, read other branches or
/// perform I/O.
///
/// A reducer that does not recognise an action simply returns `Ok(())` without
/// touching the draft; the draft then reconciles to the original `Arc` and the store
/// sees "no change".
pub mod reducer {
    use crate::action::{Action, ActionPayload};
    use crate::draft::Draft;
    use std::fmt::Debug;
    use std::marker::PhantomData;
    use std::sync::Arc;
    use thiserror::Error;

    /// A reducer rejected an action.
    ///
    /// Returning this from [`Reducer::reduce`] aborts the whole dispatch: the
    /// pre-dispatch state is kept and the error reaches the caller unless a middleware
    /// recovers it.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    #[error("{message}")]
    pub struct ReducerError {
        message: String,
    }

    impl ReducerError {
        /// Create a reducer error with a message.
        pub fn new(message: impl Into<String>) -> Self {
            Self {
                message: message.into(),
            }
        }

        /// The error message.
        #[must_use]
        pub fn message(&self) -> &str {
            &self.message
        }
    }

    /// The Reducer trait - core abstraction for state transitions
    ///
    /// # Type Parameters
    ///
    /// - `State`: The branch state this reducer owns
    /// - `Action`: The payload type of the actions it processes
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for TodoReducer {
    ///     type State = TodoState;
    ///     type Action = AppAction;
    ///
    ///     fn initial_state(&self) -> Option<TodoState> {
    ///         Some(TodoState::default())
    ///     }
    ///
    ///     fn reduce(&self, state: &mut Draft<TodoState>, action: &Action<AppAction>) -> Result<(), ReducerError> {
    ///         match action.payload() {
    ///             AppAction::AddTodo(title) => Arc::make_mut(&mut state.items).push(title.clone()),
    ///             _ => {}
    ///         }
    ///         Ok(())
    ///     }
    /// }
    /// ```
    pub trait Reducer: Send + Sync + 'static {
        /// The state type this reducer operates on
        type State: Clone + PartialEq + Debug + Send + Sync + 'static;

        /// The action payload type this reducer processes
        type Action: ActionPayload;

        /// The branch value before any action has been applied.
        ///
        /// `None` means the branch cannot be initialized, which the store treats as a
        /// fatal build error.
        fn initial_state(&self) -> Option<Self::State>;

        /// Apply an action to the draft.
        ///
        /// # Errors
        ///
        /// Returns [`ReducerError`] to abort the dispatch.
        fn reduce(
            &self,
            state: &mut Draft<Self::State>,
            action: &Action<Self::Action>,
        ) -> Result<(), ReducerError>;

        /// Run [`reduce`](Reducer::reduce) inside a fresh draft and reconcile it.
        ///
        /// # Errors
        ///
        /// Propagates the reducer's error; the input snapshot is untouched.
        fn reduce_snapshot(
            &self,
            state: Arc<Self::State>,
            action: &Action<Self::Action>,
        ) -> Result<Arc<Self::State>, ReducerError> {
            let mut draft = Draft::new(state);
            self.reduce(&mut draft, action)?;
            Ok(draft.finish())
        }
    }

    /// A reducer built from an initial value and a closure.
    ///
    /// Created by [`reducer_fn`].
    pub struct FnReducer<S, P, F> {
        initial: S,
        reduce: F,
        _payload: PhantomData<fn() -> P>,
    }

    /// Build a reducer from an initial value and a closure.
    ///
    /// ```
    /// use storex_core::action::Action;
    /// use storex_core::reducer::{reducer_fn, Reducer};
    /// use std::sync::Arc;
    ///
    /// let doubler = reducer_fn(1_i64, |state, _action: &Action<()>| {
    ///     **state *= 2;
    ///     Ok(())
    /// });
    ///
    /// let tick = Action::new("TICK", ()).unwrap();
    /// let next = doubler.reduce_snapshot(Arc::new(4), &tick).unwrap();
    /// assert_eq!(*next, 8);
    /// ```
    pub const fn reducer_fn<S, P, F>(initial: S, reduce: F) -> FnReducer<S, P, F>
    where
        F: Fn(&mut Draft<S>, &Action<P>) -> Result<(), ReducerError>,
    {
        FnReducer {
            initial,
            reduce,
            _payload: PhantomData,
        }
    }

    impl<S, P, F> Reducer for FnReducer<S, P, F>
    where
        S: Clone + PartialEq + Debug + Send + Sync + 'static,
        P: ActionPayload,
        F: Fn(&mut Draft<S>, &Action<P>) -> Result<(), ReducerError> + Send + Sync + 'static,
    {
        type State = S;
        type Action = P;

        fn initial_state(&self) -> Option<S> {
            Some(self.initial.clone())
        }

        fn reduce(&self, state: &mut Draft<S>, action: &Action<P>) -> Result<(), ReducerError> {
            (self.reduce)(state, action)
        }
    }

    /// Two reducers run in sequence over the same draft.
    ///
    /// Created by [`chain_reducers`].
    #[derive(Debug, Clone)]
    pub struct ChainedReducer<A, B> {
        first: A,
        second: B,
    }

    /// Run `first` and then `second` over the same branch.
    ///
    /// The initial state comes from `first`, falling back to `second`. An error from
    /// `first` skips `second`.
    pub const fn chain_reducers<A, B>(first: A, second: B) -> ChainedReducer<A, B>
    where
        A: Reducer,
        B: Reducer<State = A::State, Action = A::Action>,
    {
        ChainedReducer { first, second }
    }

    impl<A, B> Reducer for ChainedReducer<A, B>
    where
        A: Reducer,
        B: Reducer<State = A::State, Action = A::Action>,
    {
        type State = A::State;
        type Action = A::Action;

        fn initial_state(&self) -> Option<Self::State> {
            self.first
                .initial_state()
                .or_else(|| self.second.initial_state())
        }

        fn reduce(
            &self,
            state: &mut Draft<Self::State>,
            action: &Action<Self::Action>,
        ) -> Result<(), ReducerError> {
            self.first.reduce(state, action)?;
            self.second.reduce(state, action)
        }
    }
}

/// Environment module - What the host runtime can do
///
/// The store never detects its environment itself; it asks a [`CapabilityProbe`]
/// handed in at build time.
pub mod environment {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::str::FromStr;
    use thiserror::Error;

    /// Where the store is running.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum RuntimeEnvironment {
        /// Interactive client with a reactive runtime.
        Client,
        /// Server-side rendering or batch processing.
        Server,
        /// Unit and integration tests.
        Test,
    }

    impl fmt::Display for RuntimeEnvironment {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let name = match self {
                Self::Client => "client",
                Self::Server => "server",
                Self::Test => "test",
            };
            f.write_str(name)
        }
    }

    /// Unrecognised environment name.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    #[error("unknown runtime environment {0:?} (expected client, server or test)")]
    pub struct UnknownEnvironment(pub String);

    impl FromStr for RuntimeEnvironment {
        type Err = UnknownEnvironment;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "client" => Ok(Self::Client),
                "server" => Ok(Self::Server),
                "test" => Ok(Self::Test),
                _ => Err(UnknownEnvironment(s.to_string())),
            }
        }
    }

    /// Capability probe consulted by the signal projector.
    pub trait CapabilityProbe: Send + Sync + fmt::Debug {
        /// The detected environment.
        fn environment(&self) -> RuntimeEnvironment;

        /// Whether pull cells can be created here.
        fn is_pull_capable(&self) -> bool;
    }

    /// A probe with fixed answers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct StaticProbe {
        environment: RuntimeEnvironment,
        pull_capable: bool,
    }

    impl StaticProbe {
        /// A probe with explicit answers.
        #[must_use]
        pub const fn new(environment: RuntimeEnvironment, pull_capable: bool) -> Self {
            Self {
                environment,
                pull_capable,
            }
        }

        /// Interactive client; pull cells supported.
        #[must_use]
        pub const fn client() -> Self {
            Self::new(RuntimeEnvironment::Client, true)
        }

        /// Server; no pull cells.
        #[must_use]
        pub const fn server() -> Self {
            Self::new(RuntimeEnvironment::Server, false)
        }

        /// Test environment; pull cells supported.
        #[must_use]
        pub const fn test() -> Self {
            Self::new(RuntimeEnvironment::Test, true)
        }

        /// Probe for a named environment, using that environment's default capability.
        #[must_use]
        pub const fn for_environment(environment: RuntimeEnvironment) -> Self {
            match environment {
                RuntimeEnvironment::Client => Self::client(),
                RuntimeEnvironment::Server => Self::server(),
                RuntimeEnvironment::Test => Self::test(),
            }
        }

        /// Read `STOREX_ENVIRONMENT`, defaulting to a client probe.
        ///
        /// # Errors
        ///
        /// Returns [`UnknownEnvironment`] if the variable holds an unknown name.
        pub fn from_env() -> Result<Self, UnknownEnvironment> {
            Self::from_lookup(|key| std::env::var(key).ok())
        }

        /// Like [`from_env`](Self::from_env) with an injected variable source.
        ///
        /// # Errors
        ///
        /// Returns [`UnknownEnvironment`] if the variable holds an unknown name.
        pub fn from_lookup<F>(lookup: F) -> Result<Self, UnknownEnvironment>
        where
            F: Fn(&str) -> Option<String>,
        {
            match lookup("STOREX_ENVIRONMENT") {
                Some(value) => Ok(Self::for_environment(value.parse()?)),
                None => Ok(Self::client()),
            }
        }
    }

    impl Default for StaticProbe {
        fn default() -> Self {
            Self::client()
        }
    }

    impl CapabilityProbe for StaticProbe {
        fn environment(&self) -> RuntimeEnvironment {
            self.environment
        }

        fn is_pull_capable(&self) -> bool {
            self.pull_capable
        }
    }
}
