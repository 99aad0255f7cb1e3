//! Effects: asynchronous reactions that turn actions into further actions.
//!
//! An [`Effect`] receives the store's action stream (already narrowed by its
//! [`EffectConfig::filter`]) and state stream, and returns a stream of actions that the
//! [`EffectOrchestrator`] dispatches back into the store. An `Err` item ends the effect;
//! other effects keep running.
//!
//! Most effects follow one shape: "for each matching action, run an async handler
//! against the latest state, and dispatch what it returns". [`AsyncEffect`] packages
//! that shape together with an [`ExecutionStrategy`] that decides what happens when a
//! new trigger arrives while a handler is still running.

use crate::error::EffectError;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use storex_core::action::{Action, ActionFilter, ActionPayload};
use storex_core::reactive::{ActionStream, StateStream};
use storex_core::state::StateTree;

pub mod operators;
mod orchestrator;

pub use orchestrator::{EffectErrorCallback, EffectOrchestrator, EffectSources};

/// Output of an effect.
pub type EffectStream<P> = BoxStream<'static, Result<Action<P>, EffectError>>;

/// Turns the action and state streams into a stream of follow-up actions.
pub trait Effect<P: ActionPayload>: Send + Sync + 'static {
    /// Build the output stream. Called once each time the effect is started.
    fn run(&self, actions: ActionStream<P>, states: StateStream) -> EffectStream<P>;
}

/// An [`Effect`] backed by a closure. Built with [`effect_fn`].
pub struct FnEffect<P, F> {
    run: F,
    _payload: PhantomData<fn() -> P>,
}

/// Wrap a closure as an [`Effect`].
///
/// ```
/// use futures::StreamExt;
/// use storex_core::Action;
/// use storex_runtime::effects::{effect_fn, operators::of_type};
/// use storex_core::ActionFilter;
///
/// let pong = effect_fn(|actions, _states| {
///     of_type(actions, ActionFilter::types(["PING"]))
///         .map(|_ping: Action<()>| Action::new("PONG", ()).map_err(Into::into))
///         .boxed()
/// });
/// # let _ = pong;
/// ```
pub fn effect_fn<P, F>(run: F) -> FnEffect<P, F>
where
    P: ActionPayload,
    F: Fn(ActionStream<P>, StateStream) -> EffectStream<P> + Send + Sync + 'static,
{
    FnEffect {
        run,
        _payload: PhantomData,
    }
}

impl<P, F> Effect<P> for FnEffect<P, F>
where
    P: ActionPayload,
    F: Fn(ActionStream<P>, StateStream) -> EffectStream<P> + Send + Sync + 'static,
{
    fn run(&self, actions: ActionStream<P>, states: StateStream) -> EffectStream<P> {
        (self.run)(actions, states)
    }
}

impl<P, F> fmt::Debug for FnEffect<P, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnEffect(<closure>)")
    }
}

/// Per-registration options.
#[derive(Debug, Clone)]
pub struct EffectConfig {
    /// Disabled effects stay registered but are not started.
    pub enabled: bool,
    /// Only matching actions reach the effect.
    pub filter: ActionFilter,
}

impl EffectConfig {
    /// Restrict the effect to the listed action types.
    #[must_use]
    pub fn for_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: true,
            filter: ActionFilter::types(types),
        }
    }

    /// Enable or disable the effect.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: ActionFilter::All,
        }
    }
}

/// How an effect treats a trigger that arrives while earlier work is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// Cancel the in-flight handler; only the latest trigger produces output.
    Switch,
    /// Run every handler concurrently; outputs arrive in completion order.
    #[default]
    Merge,
    /// Queue triggers and run handlers one at a time, in order.
    Concat,
    /// Drop triggers while a handler is running.
    Exhaust,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Switch => "switch",
            Self::Merge => "merge",
            Self::Concat => "concat",
            Self::Exhaust => "exhaust",
        };
        f.write_str(name)
    }
}

type Handler<P> =
    Arc<dyn Fn(Action<P>, StateTree) -> BoxFuture<'static, Result<Option<Action<P>>, EffectError>> + Send + Sync>;

/// An action filter, an [`ExecutionStrategy`] and an async handler.
///
/// For every matching action the handler runs with the action and the latest state
/// snapshot; `Ok(Some(action))` is dispatched, `Ok(None)` produces nothing and `Err`
/// ends the effect.
pub struct AsyncEffect<P> {
    strategy: ExecutionStrategy,
    filter: ActionFilter,
    handler: Handler<P>,
}

impl<P: ActionPayload> AsyncEffect<P> {
    /// Bind a handler to the actions accepted by `filter`.
    pub fn new<F, Fut>(strategy: ExecutionStrategy, filter: ActionFilter, handler: F) -> Self
    where
        F: Fn(Action<P>, StateTree) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Action<P>>, EffectError>> + Send + 'static,
    {
        Self {
            strategy,
            filter,
            handler: Arc::new(move |action, state| handler(action, state).boxed()),
        }
    }

    /// The execution strategy.
    #[must_use]
    pub const fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }
}

impl<P: ActionPayload> Effect<P> for AsyncEffect<P> {
    fn run(&self, actions: ActionStream<P>, states: StateStream) -> EffectStream<P> {
        let handler = Arc::clone(&self.handler);
        let triggers = operators::with_latest_from(operators::of_type(actions, self.filter.clone()), states);
        operators::apply_strategy(self.strategy, triggers, move |(action, state)| {
            (*handler)(action, state.unwrap_or_default())
        })
        .filter_map(|result| async move { result.transpose() })
        .boxed()
    }
}

impl<P> fmt::Debug for AsyncEffect<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncEffect")
            .field("strategy", &self.strategy)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}
