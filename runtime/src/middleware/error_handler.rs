//! Error isolation middleware.

use super::{DispatchOutcome, DispatchResult, Dispatchable, Middleware, MiddlewareApi, MiddlewareOptions, Next};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use std::error::Error as _;
use std::fmt;
use std::sync::Arc;
use storex_core::action::{Action, ActionPayload};
use storex_core::state::StateTree;

type ErrorCallback<P> = Arc<dyn Fn(&ErrorRecord<P>) + Send + Sync>;
type RecoverCallback<P> = Arc<dyn Fn(&ErrorRecord<P>) -> Option<Action<P>> + Send + Sync>;

/// Structured description of a failed dispatch.
#[derive(Debug, Clone)]
pub struct ErrorRecord<P> {
    /// The error's display text.
    pub message: String,
    /// The error followed by its `source()` chain.
    pub source_chain: Vec<String>,
    /// The original error.
    pub error: StoreError,
    /// The offending action, if the input was an action.
    pub action: Option<Action<P>>,
    /// Action type or command name of the input.
    pub label: String,
    /// State at the time of the failure (the pre-dispatch state).
    pub state: StateTree,
    /// When the failure was observed.
    pub timestamp: DateTime<Utc>,
}

impl<P> ErrorRecord<P> {
    fn new(error: StoreError, action: Option<Action<P>>, label: String, state: StateTree) -> Self {
        let mut source_chain = vec![error.to_string()];
        let mut source = error.source();
        while let Some(cause) = source {
            source_chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: error.to_string(),
            source_chain,
            error,
            action,
            label,
            state,
            timestamp: Utc::now(),
        }
    }
}

/// Options for [`ErrorHandlingMiddleware`].
pub struct ErrorHandlingOptions<P> {
    /// Return the error to the caller after reporting it (default `true`).
    pub rethrow: bool,
    /// Called with every failure record.
    pub on_error: Option<ErrorCallback<P>>,
    /// Proposes a recovery action when the error is swallowed.
    pub recover: Option<RecoverCallback<P>>,
    /// Shared enable flag and action filter.
    pub options: MiddlewareOptions,
}

impl<P> Default for ErrorHandlingOptions<P> {
    fn default() -> Self {
        Self {
            rethrow: true,
            on_error: None,
            recover: None,
            options: MiddlewareOptions::default(),
        }
    }
}

impl<P> Clone for ErrorHandlingOptions<P> {
    fn clone(&self) -> Self {
        Self {
            rethrow: self.rethrow,
            on_error: self.on_error.clone(),
            recover: self.recover.clone(),
            options: self.options.clone(),
        }
    }
}

impl<P> fmt::Debug for ErrorHandlingOptions<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandlingOptions")
            .field("rethrow", &self.rethrow)
            .field("on_error", &self.on_error.is_some())
            .field("recover", &self.recover.is_some())
            .field("options", &self.options)
            .finish()
    }
}

/// Reports downstream failures and optionally swallows them.
///
/// Invalid input and dispatches on a destroyed store always reach the caller.
/// Recovery actions are returned in [`DispatchOutcome::Recovered`], never dispatched.
#[derive(Debug, Clone)]
pub struct ErrorHandlingMiddleware<P> {
    options: ErrorHandlingOptions<P>,
}

impl<P: ActionPayload> ErrorHandlingMiddleware<P> {
    /// Create with explicit options.
    #[must_use]
    pub const fn new(options: ErrorHandlingOptions<P>) -> Self {
        Self { options }
    }

    /// Report and rethrow.
    #[must_use]
    pub fn rethrowing() -> Self {
        Self::new(ErrorHandlingOptions::default())
    }

    /// Report and swallow, asking `recover` for a substitute action.
    #[must_use]
    pub fn recovering<F>(recover: F) -> Self
    where
        F: Fn(&ErrorRecord<P>) -> Option<Action<P>> + Send + Sync + 'static,
    {
        Self::new(ErrorHandlingOptions {
            rethrow: false,
            recover: Some(Arc::new(recover)),
            ..ErrorHandlingOptions::default()
        })
    }

    /// Attach a failure callback.
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ErrorRecord<P>) + Send + Sync + 'static,
    {
        self.options.on_error = Some(Arc::new(callback));
        self
    }
}

impl<P: ActionPayload> Default for ErrorHandlingMiddleware<P> {
    fn default() -> Self {
        Self::rethrowing()
    }
}

impl<P: ActionPayload> Middleware<P> for ErrorHandlingMiddleware<P> {
    fn name(&self) -> &str {
        "error-handler"
    }

    fn applies_to(&self, input: &Dispatchable<P>) -> bool {
        self.options.options.applies_to(input)
    }

    fn handle(&self, api: &MiddlewareApi<P>, input: Dispatchable<P>, next: &Next<P>) -> DispatchResult<P> {
        let action = input.as_action().cloned();
        let label = input.label().to_string();

        let error = match next.call(input) {
            Err(error) if !error.is_fatal() => error,
            other => return other,
        };

        let record = ErrorRecord::new(error, action, label, api.get_state());
        api.logger()
            .error(format_args!("dispatch of {} failed: {}", record.label, record.message));
        if let Some(on_error) = &self.options.on_error {
            (**on_error)(&record);
        }

        if self.options.rethrow {
            return Err(record.error);
        }
        let recovery = self
            .options
            .recover
            .as_ref()
            .and_then(|recover| (**recover)(&record));
        Ok(DispatchOutcome::Recovered(recovery))
    }
}
