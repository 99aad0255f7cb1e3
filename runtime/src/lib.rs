//! # Storex Runtime
//!
//! Runtime implementation for the Storex state container.
//!
//! This crate provides the [`Store`] that owns application state and coordinates
//! everything that touches it.
//!
//! ## Core Components
//!
//! - **Store**: Serialized dispatch, reducer application, state and action streams
//! - **Middleware Chain**: Ordered interceptors wrapping `dispatch`
//! - **Signal Projector**: Cached pull cells mirroring selected state
//! - **Effect Orchestrator**: Turns actions into further actions, fed back into `dispatch`
//! - **Store Builder**: Fluent accumulation of reducers, middleware and effects
//!
//! ## Example
//!
//! ```ignore
//! use storex_runtime::{StoreBuilder, middleware::LoggingMiddleware};
//!
//! let store = StoreBuilder::new()
//!     .register_reducer("counter", CounterReducer)
//!     .apply_middleware(LoggingMiddleware::default())
//!     .build()?;
//!
//! store.dispatch(increment.call())?;
//! let count = store.get_state().get::<Counter>("counter").map(|c| c.count);
//! ```

/// Store configuration
pub mod config;

/// Store builder
pub mod builder;

/// Effect orchestration and stream operators
pub mod effects;

/// State listeners
pub mod listeners;

/// Prometheus metrics for observability
pub mod metrics;

/// Dispatch middleware and built-ins
pub mod middleware;

/// Pull-cell projections of store state
pub mod signals;

/// The Store runtime
pub mod store;

pub use builder::StoreBuilder;
pub use config::StoreConfig;
pub use error::{EffectError, StoreError};
pub use middleware::{Command, DispatchOutcome, DispatchResult, Dispatchable, Middleware};
pub use store::{Store, StoreInfo};

/// Error types for the Store runtime
pub mod error {
    use storex_core::action::InvalidActionError;
    use storex_core::composition::CompositionError;
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// The dispatched input is malformed
        ///
        /// Always returned to the caller; no middleware can swallow it.
        #[error("Invalid action: {0}")]
        InvalidAction(#[from] InvalidActionError),

        /// A reducer returned an error or panicked
        ///
        /// The pre-dispatch state is kept.
        #[error("Reducer for branch '{branch}' failed on '{action_type}': {message}")]
        ReducerExecution {
            /// Branch whose reducer failed
            branch: String,
            /// Type of the action being reduced
            action_type: String,
            /// Reducer error or panic message
            message: String,
        },

        /// A branch produced no initial value
        #[error("Reducer for branch '{key}' returned no initial state")]
        UninitializedBranch {
            /// The offending key
            key: String,
        },

        /// Invalid middleware, reducer or effect registration
        #[error("Invalid registration: {0}")]
        MiddlewareConfig(String),

        /// An effect failed
        ///
        /// Isolated: only reported through logs and the effect error callback.
        #[error("Effect '{effect}' failed: {message}")]
        EffectExecution {
            /// Name of the failing effect
            effect: String,
            /// Error or panic message
            message: String,
        },

        /// A pull-cell projection could not be built or updated
        ///
        /// Isolated: the projection degrades to `None`.
        #[error("Signal projection failed: {0}")]
        SignalProjection(String),

        /// The builder had no reducers
        #[error("At least one reducer must be registered")]
        NoReducers,

        /// Configuration could not be loaded or is invalid
        #[error("Invalid configuration: {0}")]
        Config(String),

        /// The store has been destroyed
        #[error("Store has been destroyed")]
        Destroyed,

        /// An operation needed a Tokio runtime but none is running
        #[error("No Tokio runtime available for {0}")]
        RuntimeUnavailable(String),
    }

    impl StoreError {
        /// Errors that must reach the caller regardless of middleware.
        #[must_use]
        pub const fn is_fatal(&self) -> bool {
            matches!(self, Self::InvalidAction(_) | Self::Destroyed)
        }

        /// Map a reduction failure for an action of `action_type`.
        #[must_use]
        pub fn from_reduction(error: CompositionError, action_type: &str) -> Self {
            match error {
                CompositionError::ReducerFailed { key, source } => Self::ReducerExecution {
                    branch: key,
                    action_type: action_type.to_string(),
                    message: source.message().to_string(),
                },
                other => Self::from(other),
            }
        }
    }

    impl From<CompositionError> for StoreError {
        fn from(error: CompositionError) -> Self {
            match error {
                CompositionError::UninitializedBranch { key } => Self::UninitializedBranch { key },
                CompositionError::ReducerFailed { key, source } => Self::ReducerExecution {
                    branch: key,
                    action_type: String::new(),
                    message: source.message().to_string(),
                },
                CompositionError::EmptyKey | CompositionError::DuplicateKey(_) => {
                    Self::MiddlewareConfig(error.to_string())
                },
            }
        }
    }

    /// Failure produced by an effect stream
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    #[error("{message}")]
    pub struct EffectError {
        message: String,
    }

    impl EffectError {
        /// Create an effect error with a message.
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

    impl From<InvalidActionError> for EffectError {
        fn from(error: InvalidActionError) -> Self {
            Self::new(error.to_string())
        }
    }

    impl From<StoreError> for EffectError {
        fn from(error: StoreError) -> Self {
            Self::new(error.to_string())
        }
    }
}
