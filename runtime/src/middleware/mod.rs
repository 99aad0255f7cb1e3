//! Dispatch middleware.
//!
//! Middleware wraps `dispatch`: each one receives the input, may inspect or replace
//! it, and decides whether and when to hand it to the rest of the chain through
//! [`Next`]. The chain is composed right-to-left, so the first registered middleware
//! is the outermost one:
//!
//! ```text
//! dispatch ─▶ A.before ─▶ B.before ─▶ reducers ─▶ B.after ─▶ A.after ─▶ caller
//! ```
//!
//! A middleware that is disabled, or whose action filter rejects the input, is skipped
//! entirely and the input flows on unchanged.

use crate::error::StoreError;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use storex_core::action::{Action, ActionFilter, ActionPayload};
use storex_core::logger::Logger;
use storex_core::state::StateTree;

mod debounce;
mod error_handler;
mod logging;
mod performance;
mod thunk;

pub use debounce::DebounceMiddleware;
pub use error_handler::{ErrorHandlingMiddleware, ErrorHandlingOptions, ErrorRecord};
pub use logging::{LoggingMiddleware, LoggingOptions};
pub use performance::{ActionTiming, PerformanceMiddleware, PerformanceOptions};
pub use thunk::ThunkMiddleware;

/// What happened to a dispatched input.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome<P> {
    /// The action reached the reducers.
    Applied {
        /// Whether the state reference changed.
        changed: bool,
    },
    /// A middleware will forward the action later (or never, if superseded).
    Deferred,
    /// A command was run by the command middleware.
    Executed,
    /// The error middleware swallowed a failure, optionally proposing a recovery action.
    ///
    /// The recovery action is not dispatched.
    Recovered(Option<Action<P>>),
}

impl<P> DispatchOutcome<P> {
    /// Whether the state changed during this dispatch.
    #[must_use]
    pub const fn changed(&self) -> bool {
        matches!(self, Self::Applied { changed: true })
    }
}

/// Result of a dispatch.
pub type DispatchResult<P> = Result<DispatchOutcome<P>, StoreError>;

type SyncCommand<P> = Box<dyn FnOnce(&MiddlewareApi<P>) -> Result<(), StoreError> + Send>;
type AsyncCommand<P> = Box<dyn FnOnce(MiddlewareApi<P>) -> BoxFuture<'static, Result<(), StoreError>> + Send>;

enum CommandBody<P> {
    Sync(SyncCommand<P>),
    Async(AsyncCommand<P>),
}

/// A function dispatched in place of an action.
///
/// Commands only run when a [`ThunkMiddleware`] is installed; otherwise they reach the
/// reducers and are rejected as invalid input.
pub struct Command<P> {
    name: Cow<'static, str>,
    body: CommandBody<P>,
}

impl<P: ActionPayload> Command<P> {
    /// A command that runs synchronously inside `dispatch`.
    pub fn sync<F>(name: impl Into<Cow<'static, str>>, run: F) -> Self
    where
        F: FnOnce(&MiddlewareApi<P>) -> Result<(), StoreError> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: CommandBody::Sync(Box::new(run)),
        }
    }

    /// A command that runs as a spawned task.
    pub fn future<F, Fut>(name: impl Into<Cow<'static, str>>, run: F) -> Self
    where
        F: FnOnce(MiddlewareApi<P>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), StoreError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: CommandBody::Async(Box::new(move |api| run(api).boxed())),
        }
    }
}

impl<P> Command<P> {
    /// The command name, used for logging and filtering.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the command runs asynchronously.
    #[must_use]
    pub const fn is_async(&self) -> bool {
        matches!(self.body, CommandBody::Async(_))
    }
}

impl<P> fmt::Debug for Command<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("async", &self.is_async())
            .finish()
    }
}

/// Anything that can be passed to `dispatch`.
#[derive(Debug)]
pub enum Dispatchable<P> {
    /// A plain action, reduced by the store.
    Action(Action<P>),
    /// A command, run by the command middleware.
    Command(Command<P>),
}

impl<P> Dispatchable<P> {
    /// The action type, or the command name.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Action(action) => action.action_type().as_str(),
            Self::Command(command) => command.name(),
        }
    }

    /// The action, if this is one.
    #[must_use]
    pub const fn as_action(&self) -> Option<&Action<P>> {
        match self {
            Self::Action(action) => Some(action),
            Self::Command(_) => None,
        }
    }
}

impl<P> From<Action<P>> for Dispatchable<P> {
    fn from(action: Action<P>) -> Self {
        Self::Action(action)
    }
}

impl<P> From<Command<P>> for Dispatchable<P> {
    fn from(command: Command<P>) -> Self {
        Self::Command(command)
    }
}

/// The store as seen from middleware.
pub(crate) trait DispatchTarget<P>: Send + Sync {
    fn current_state(&self) -> StateTree;
    fn dispatch_input(&self, input: Dispatchable<P>) -> DispatchResult<P>;
}

/// `{get_state, dispatch}` handle given to middleware and commands.
///
/// Holds the store weakly; after the store is dropped `dispatch` fails with
/// [`StoreError::Destroyed`] and `get_state` returns an empty tree.
pub struct MiddlewareApi<P> {
    target: Weak<dyn DispatchTarget<P>>,
    logger: Logger,
}

impl<P: ActionPayload> MiddlewareApi<P> {
    pub(crate) fn new(target: Weak<dyn DispatchTarget<P>>, logger: Logger) -> Self {
        Self { target, logger }
    }

    /// The current state.
    #[must_use]
    pub fn get_state(&self) -> StateTree {
        self.target
            .upgrade()
            .map(|store| store.current_state())
            .unwrap_or_default()
    }

    /// Dispatch through the whole chain, from the outermost middleware.
    ///
    /// # Errors
    ///
    /// Returns whatever the full dispatch returns.
    pub fn dispatch(&self, input: impl Into<Dispatchable<P>>) -> DispatchResult<P> {
        match self.target.upgrade() {
            Some(store) => store.dispatch_input(input.into()),
            None => Err(StoreError::Destroyed),
        }
    }

    /// The store's logger.
    #[must_use]
    pub const fn logger(&self) -> &Logger {
        &self.logger
    }
}

impl<P> Clone for MiddlewareApi<P> {
    fn clone(&self) -> Self {
        Self {
            target: Weak::clone(&self.target),
            logger: self.logger.clone(),
        }
    }
}

impl<P> fmt::Debug for MiddlewareApi<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareApi")
            .field("scope", &self.logger.scope())
            .field("attached", &(self.target.strong_count() > 0))
            .finish()
    }
}

/// The rest of the chain after the current middleware.
pub struct Next<P> {
    run: Arc<dyn Fn(Dispatchable<P>) -> DispatchResult<P> + Send + Sync>,
}

impl<P> Next<P> {
    /// Wrap a function as a chain link.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(Dispatchable<P>) -> DispatchResult<P> + Send + Sync + 'static,
    {
        Self { run: Arc::new(run) }
    }

    /// Hand the input to the rest of the chain.
    ///
    /// # Errors
    ///
    /// Returns the downstream result.
    pub fn call(&self, input: Dispatchable<P>) -> DispatchResult<P> {
        (*self.run)(input)
    }
}

impl<P> Clone for Next<P> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
        }
    }
}

impl<P> fmt::Debug for Next<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next(<chain>)")
    }
}

/// `enabled` flag and action filter shared by every built-in middleware.
#[derive(Debug, Clone)]
pub struct MiddlewareOptions {
    /// When `false` the middleware is skipped.
    pub enabled: bool,
    /// Inputs whose label does not match skip the middleware.
    pub filter: ActionFilter,
}

impl MiddlewareOptions {
    /// Whether the middleware should run for `input`.
    #[must_use]
    pub fn applies_to<P>(&self, input: &Dispatchable<P>) -> bool {
        self.enabled && self.filter.matches(input.label())
    }
}

impl Default for MiddlewareOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: ActionFilter::All,
        }
    }
}

/// A dispatch interceptor.
pub trait Middleware<P: ActionPayload>: Send + Sync + 'static {
    /// Unique name, used by `remove_middleware`.
    fn name(&self) -> &str;

    /// Whether the middleware handles `input`; `false` passes it through untouched.
    fn applies_to(&self, input: &Dispatchable<P>) -> bool {
        let _ = input;
        true
    }

    /// Handle one input.
    ///
    /// # Errors
    ///
    /// Returns downstream errors, or the middleware's own.
    fn handle(&self, api: &MiddlewareApi<P>, input: Dispatchable<P>, next: &Next<P>) -> DispatchResult<P>;

    /// Called once when the store is destroyed or the middleware removed.
    fn teardown(&self) {}
}

/// Compose middleware around `terminal`, first element outermost.
pub(crate) fn compose<P: ActionPayload>(
    middleware: &[Arc<dyn Middleware<P>>],
    api: &MiddlewareApi<P>,
    terminal: Next<P>,
) -> Next<P> {
    middleware.iter().rev().fold(terminal, |next, layer| {
        let layer = Arc::clone(layer);
        let api = api.clone();
        Next::new(move |input| {
            if layer.applies_to(&input) {
                layer.handle(&api, input, &next)
            } else {
                next.call(input)
            }
        })
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use storex_core::logger::LogLevel;
    use storex_core::sync::lock;

    struct Tag {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        options: MiddlewareOptions,
    }

    impl Middleware<()> for Tag {
        fn name(&self) -> &str {
            self.name
        }

        fn applies_to(&self, input: &Dispatchable<()>) -> bool {
            self.options.applies_to(input)
        }

        fn handle(&self, _: &MiddlewareApi<()>, input: Dispatchable<()>, next: &Next<()>) -> DispatchResult<()> {
            lock(&self.log).push(format!("{}.before", self.name));
            let result = next.call(input);
            lock(&self.log).push(format!("{}.after", self.name));
            result
        }
    }

    fn detached_api() -> MiddlewareApi<()> {
        let target: Weak<dyn DispatchTarget<()>> = Weak::<Detached>::new();
        MiddlewareApi::new(target, Logger::new("test", LogLevel::Debug))
    }

    struct Detached;

    impl DispatchTarget<()> for Detached {
        fn current_state(&self) -> StateTree {
            StateTree::empty()
        }

        fn dispatch_input(&self, _: Dispatchable<()>) -> DispatchResult<()> {
            Ok(DispatchOutcome::Applied { changed: false })
        }
    }

    fn chain(log: &Arc<Mutex<Vec<String>>>, filters: [MiddlewareOptions; 2]) -> Next<()> {
        let [a, b] = filters;
        let layers: Vec<Arc<dyn Middleware<()>>> = vec![
            Arc::new(Tag {
                name: "A",
                log: Arc::clone(log),
                options: a,
            }),
            Arc::new(Tag {
                name: "B",
                log: Arc::clone(log),
                options: b,
            }),
        ];
        let terminal_log = Arc::clone(log);
        let terminal = Next::new(move |_| {
            lock(&terminal_log).push("reducer".to_string());
            Ok(DispatchOutcome::Applied { changed: true })
        });
        compose(&layers, &detached_api(), terminal)
    }

    #[test]
    fn test_first_registered_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let next = chain(&log, [MiddlewareOptions::default(), MiddlewareOptions::default()]);
        next.call(Action::new("PING", ()).unwrap().into()).unwrap();

        assert_eq!(
            *lock(&log),
            vec!["A.before", "B.before", "reducer", "B.after", "A.after"]
        );
    }

    #[test]
    fn test_disabled_and_filtered_layers_pass_through() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let disabled = MiddlewareOptions {
            enabled: false,
            ..MiddlewareOptions::default()
        };
        let filtered = MiddlewareOptions {
            filter: ActionFilter::types(["OTHER"]),
            ..MiddlewareOptions::default()
        };
        let next = chain(&log, [disabled, filtered]);
        let outcome = next.call(Action::new("PING", ()).unwrap().into()).unwrap();

        assert!(outcome.changed());
        assert_eq!(*lock(&log), vec!["reducer"]);
    }

    #[test]
    fn test_detached_api_degrades() {
        let api = detached_api();
        assert!(api.get_state().is_empty());
        assert_eq!(
            api.dispatch(Action::new("PING", ()).unwrap()),
            Err(StoreError::Destroyed)
        );
    }

    #[test]
    fn test_dispatchable_labels() {
        let action: Dispatchable<()> = Action::new("PING", ()).unwrap().into();
        let command: Dispatchable<()> = Command::sync("load", |_| Ok(())).into();
        assert_eq!(action.label(), "PING");
        assert_eq!(command.label(), "load");
        assert!(command.as_action().is_none());
    }
}
