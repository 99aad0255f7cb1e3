//! The Store: owns the state tree and serializes every change to it.
//!
//! # Dispatch
//!
//! ```text
//! dispatch(input)
//!   └─▶ middleware chain (first registered outermost)
//!         └─▶ terminal, under the dispatch lock:
//!               1. publish the action on the action stream
//!               2. reduce every branch on a draft
//!               3. if the tree reference changed: store it, emit on the state stream
//!   └─▶ after the lock: update signals, notify listeners
//! ```
//!
//! Only the terminal step holds the dispatch lock, so middleware, listeners, commands
//! and effects may dispatch again.

use crate::config::StoreConfig;
use crate::effects::{Effect, EffectConfig, EffectErrorCallback, EffectOrchestrator, EffectSources};
use crate::error::StoreError;
use crate::listeners::{ListenerRegistry, Subscription};
use crate::metrics::{DispatchMetrics, ReducerMetrics};
use crate::middleware::{DispatchOutcome, DispatchResult, DispatchTarget, Dispatchable, Middleware, MiddlewareApi, Next, compose};
use crate::signals::{MemoHandle, PullHandle, SelectOptions, SignalProjector};
use async_stream::stream;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Instant;
use storex_core::action::{Action, ActionPayload, InvalidActionError};
use storex_core::composition::{CombinedReducer, CompositionError};
use storex_core::environment::{CapabilityProbe, RuntimeEnvironment};
use storex_core::logger::Logger;
use storex_core::reactive::{ActionStream, StateStream};
use storex_core::state::StateTree;
use storex_core::sync::{lock, read, write};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Everything the builder hands over to a new store.
pub(crate) struct StoreParts<P: ActionPayload> {
    pub(crate) config: StoreConfig,
    pub(crate) probe: Arc<dyn CapabilityProbe>,
    pub(crate) reducer: CombinedReducer<P>,
    pub(crate) middleware: Vec<Arc<dyn Middleware<P>>>,
    pub(crate) effects: Vec<(String, Arc<dyn Effect<P>>, EffectConfig)>,
    pub(crate) on_effect_error: Option<EffectErrorCallback<P>>,
}

struct StoreInner<P: ActionPayload> {
    config: StoreConfig,
    logger: Logger,
    probe: Arc<dyn CapabilityProbe>,
    state: RwLock<StateTree>,
    reducer: RwLock<Arc<CombinedReducer<P>>>,
    dispatch_lock: Mutex<()>,
    middleware: RwLock<Vec<Arc<dyn Middleware<P>>>>,
    chain: RwLock<Next<P>>,
    action_tx: Mutex<Option<broadcast::Sender<Action<P>>>>,
    state_tx: Mutex<Option<broadcast::Sender<StateTree>>>,
    listeners: Arc<ListenerRegistry>,
    signals: SignalProjector,
    effects: EffectOrchestrator<P>,
    destroyed: AtomicBool,
    self_ref: Weak<StoreInner<P>>,
}

/// Snapshot of a store's configuration and activity.
#[derive(Debug, Clone)]
pub struct StoreInfo {
    /// Store name from the configuration.
    pub name: String,
    /// Environment reported by the capability probe.
    pub environment: RuntimeEnvironment,
    /// Whether `select` can currently return pull cells.
    pub signals_enabled: bool,
    /// Installed middleware.
    pub middleware_count: usize,
    /// Registered effects.
    pub effects_count: usize,
    /// Effect names in registration order.
    pub effect_names: Vec<String>,
    /// The current state.
    pub current_state: StateTree,
    /// Whether any listener, signal, stream subscriber or effect task is live.
    pub has_active_subscriptions: bool,
    /// Whether `destroy` has been called.
    pub destroyed: bool,
}

/// A reactive state container.
///
/// Cheap to clone; clones share one store. Built with
/// [`StoreBuilder`](crate::StoreBuilder).
pub struct Store<P: ActionPayload> {
    inner: Arc<StoreInner<P>>,
}

impl<P: ActionPayload> Clone for Store<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn api_for<P: ActionPayload>(weak: &Weak<StoreInner<P>>, logger: &Logger) -> MiddlewareApi<P> {
    let target: Weak<dyn DispatchTarget<P>> = weak.clone();
    MiddlewareApi::new(target, logger.clone())
}

fn terminal_for<P: ActionPayload>(weak: &Weak<StoreInner<P>>) -> Next<P> {
    let weak = weak.clone();
    Next::new(move |input| match weak.upgrade() {
        Some(inner) => inner.apply(input),
        None => Err(StoreError::Destroyed),
    })
}

fn broadcast_stream<T>(receiver: Option<broadcast::Receiver<T>>, logger: Logger, label: &'static str) -> BoxStream<'static, T>
where
    T: Clone + Send + 'static,
{
    let Some(mut receiver) = receiver else {
        return stream::empty().boxed();
    };
    stream! {
        loop {
            match receiver.recv().await {
                Ok(item) => yield item,
                Err(RecvError::Lagged(skipped)) => {
                    logger.warn(format_args!("{label} stream lagged, {skipped} item(s) skipped"));
                },
                Err(RecvError::Closed) => break,
            }
        }
    }
    .boxed()
}

impl<P: ActionPayload> StoreInner<P> {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// End of the middleware chain: publish, reduce, store.
    fn apply(&self, input: Dispatchable<P>) -> DispatchResult<P> {
        let action = match input {
            Dispatchable::Action(action) => action,
            Dispatchable::Command(command) => {
                self.logger.warn(format_args!(
                    "command '{}' reached the reducers; install ThunkMiddleware to run commands",
                    command.name()
                ));
                return Err(InvalidActionError::UnhandledCommand.into());
            },
        };
        action.validate()?;
        let action_type = action.action_type().as_str();
        DispatchMetrics::record_dispatch(action_type);

        let changed = {
            let _guard = lock(&self.dispatch_lock);
            if self.is_destroyed() {
                return Err(StoreError::Destroyed);
            }
            if let Some(sender) = lock(&self.action_tx).as_ref() {
                // no subscribers is fine
                let _ = sender.send(action.clone());
            }

            let reducer = Arc::clone(&*read(&self.reducer));
            let previous = read(&self.state).clone();
            let started = Instant::now();
            let reduction = match reducer.reduce(&previous, &action) {
                Ok(reduction) => reduction,
                Err(error) => {
                    if let CompositionError::ReducerFailed { key, .. } = &error {
                        ReducerMetrics::record_error(key);
                    }
                    let error = StoreError::from_reduction(error, action_type);
                    self.logger.error(&error);
                    return Err(error);
                },
            };
            ReducerMetrics::record_execution(started.elapsed());

            for key in &reduction.missing {
                self.logger.warn(format_args!(
                    "branch '{key}' produced no value for {action_type}; keeping its previous state"
                ));
            }

            if reduction.is_changed() {
                *write(&self.state) = reduction.state.clone();
                ReducerMetrics::record_state_change();
                if let Some(sender) = lock(&self.state_tx).as_ref() {
                    let _ = sender.send(reduction.state);
                }
                true
            } else {
                false
            }
        };

        if changed {
            self.notify();
        }
        Ok(DispatchOutcome::Applied { changed })
    }

    fn notify(&self) {
        let state = read(&self.state).clone();
        self.signals.on_state(&state);
        self.listeners.notify(&state);
    }

    fn recompose(&self) {
        let chain = compose(
            &read(&self.middleware),
            &api_for(&self.self_ref, &self.logger),
            terminal_for(&self.self_ref),
        );
        *write(&self.chain) = chain;
    }
}

impl<P: ActionPayload> DispatchTarget<P> for StoreInner<P> {
    fn current_state(&self) -> StateTree {
        read(&self.state).clone()
    }

    fn dispatch_input(&self, input: Dispatchable<P>) -> DispatchResult<P> {
        if self.is_destroyed() {
            return Err(StoreError::Destroyed);
        }
        if let Dispatchable::Action(action) = &input {
            action.validate()?;
        }
        let chain = read(&self.chain).clone();
        chain.call(input)
    }
}

impl<P: ActionPayload> Store<P> {
    pub(crate) fn from_parts(parts: StoreParts<P>) -> Result<Self, StoreError> {
        let StoreParts {
            config,
            probe,
            reducer,
            middleware,
            effects,
            on_effect_error,
        } = parts;

        let initial = reducer.initial_state()?;
        let logger = Logger::new(config.name.clone(), config.log_level);
        let (action_tx, _) = broadcast::channel(config.action_buffer);
        let (state_tx, _) = broadcast::channel(config.state_buffer);
        let signals = SignalProjector::new(config.enable_signals, Arc::clone(&probe), logger.scoped("signals"));
        let orchestrator = EffectOrchestrator::new(logger.scoped("effects")).with_error_callback(on_effect_error);
        let listeners = Arc::new(ListenerRegistry::new(logger.scoped("listeners")));

        let inner = Arc::new_cyclic(|weak: &Weak<StoreInner<P>>| {
            let chain = compose(&middleware, &api_for(weak, &logger), terminal_for(weak));
            StoreInner {
                config,
                logger,
                probe,
                state: RwLock::new(initial),
                reducer: RwLock::new(Arc::new(reducer)),
                dispatch_lock: Mutex::new(()),
                middleware: RwLock::new(middleware),
                chain: RwLock::new(chain),
                action_tx: Mutex::new(Some(action_tx)),
                state_tx: Mutex::new(Some(state_tx)),
                listeners,
                signals,
                effects: orchestrator,
                destroyed: AtomicBool::new(false),
                self_ref: weak.clone(),
            }
        });
        let store = Self { inner };

        for (name, effect, config) in effects {
            store.inner.effects.register_shared(name, effect, config)?;
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            store.inner.effects.start(store.effect_sources())?;
        } else if !store.inner.effects.is_empty() {
            return Err(StoreError::RuntimeUnavailable("starting effects".to_string()));
        }

        store.inner.logger.debug(format_args!(
            "store created with branches {:?}",
            read(&store.inner.reducer).keys().collect::<Vec<_>>()
        ));
        Ok(store)
    }

    /// Dispatch an action or command through the middleware chain.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidAction`] for a malformed action or an unhandled command
    /// - [`StoreError::ReducerExecution`] when a reducer fails; the state is unchanged
    /// - [`StoreError::Destroyed`] after [`destroy`](Self::destroy)
    /// - any error raised by middleware
    #[tracing::instrument(skip(self, input), name = "store_dispatch")]
    pub fn dispatch(&self, input: impl Into<Dispatchable<P>>) -> DispatchResult<P> {
        self.inner.dispatch_input(input.into())
    }

    /// The current state snapshot.
    #[must_use]
    pub fn get_state(&self) -> StateTree {
        self.inner.current_state()
    }

    /// Call `listener` with the latest state after every change.
    ///
    /// Listeners run synchronously after the dispatch that changed the state, outside
    /// the dispatch lock. Drop the returned [`Subscription`] to stop.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StateTree) + Send + Sync + 'static,
    {
        self.inner.listeners.add(Arc::new(listener))
    }

    /// A cached pull cell tracking `selector(state)`.
    ///
    /// Returns `None` when the runtime has no pull support, signals are disabled, the
    /// selector fails, or the result type is a callable.
    pub fn select<R, S>(&self, selector: S, options: SelectOptions<R>) -> Option<PullHandle<R>>
    where
        R: Clone + PartialEq + Send + Sync + 'static,
        S: Fn(&StateTree) -> R + Send + Sync + 'static,
    {
        self.inner
            .signals
            .create_signal(|| self.get_state(), selector, options)
    }

    /// A cached memo computed lazily from a pull cell tracking `selector(state)`.
    ///
    /// `None` under the same conditions as [`select`](Self::select).
    pub fn select_memo<R, S, U, C>(&self, selector: S, compute: C, options: SelectOptions<R>) -> Option<MemoHandle<U>>
    where
        R: Clone + PartialEq + Send + Sync + 'static,
        S: Fn(&StateTree) -> R + Send + Sync + 'static,
        U: Clone + Send + Sync + 'static,
        C: Fn(&R) -> U + Send + Sync + 'static,
    {
        self.inner
            .signals
            .create_memo_signal(|| self.get_state(), selector, compute, options)
    }

    /// Stream of `selector(state)`, starting with the current value and skipping
    /// consecutive duplicates.
    pub fn select_state<R, S>(&self, selector: S) -> BoxStream<'static, R>
    where
        R: Clone + PartialEq + Send + 'static,
        S: Fn(&StateTree) -> R + Send + Sync + 'static,
    {
        self.select_state_with(selector, |a: &R, b: &R| a == b)
    }

    /// Like [`select_state`](Self::select_state) with a custom equality.
    pub fn select_state_with<R, S, E>(&self, selector: S, equals: E) -> BoxStream<'static, R>
    where
        R: Clone + Send + 'static,
        S: Fn(&StateTree) -> R + Send + Sync + 'static,
        E: Fn(&R, &R) -> bool + Send + Sync + 'static,
    {
        let mut states = self.state_stream();
        stream! {
            let mut last: Option<R> = None;
            while let Some(state) = states.next().await {
                let value = selector(&state);
                if last.as_ref().is_some_and(|previous| equals(previous, &value)) {
                    continue;
                }
                last = Some(value.clone());
                yield value;
            }
        }
        .boxed()
    }

    /// Every dispatched action, published before it is reduced.
    ///
    /// Ends when the store is destroyed.
    #[must_use]
    pub fn action_stream(&self) -> ActionStream<P> {
        let receiver = lock(&self.inner.action_tx).as_ref().map(broadcast::Sender::subscribe);
        broadcast_stream(receiver, self.inner.logger.clone(), "action")
    }

    /// The current state followed by every changed state.
    ///
    /// Ends when the store is destroyed.
    #[must_use]
    pub fn state_stream(&self) -> StateStream {
        let (current, receiver) = {
            let _guard = lock(&self.inner.dispatch_lock);
            let receiver = lock(&self.inner.state_tx).as_ref().map(broadcast::Sender::subscribe);
            (self.get_state(), receiver)
        };
        stream::once(async move { current })
            .chain(broadcast_stream(receiver, self.inner.logger.clone(), "state"))
            .boxed()
    }

    /// Append a middleware; it becomes the innermost layer.
    ///
    /// # Errors
    ///
    /// [`StoreError::MiddlewareConfig`] if a middleware with the same name is installed,
    /// [`StoreError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn add_middleware<M: Middleware<P>>(&self, middleware: M) -> Result<(), StoreError> {
        self.add_middleware_shared(Arc::new(middleware))
    }

    pub(crate) fn add_middleware_shared(&self, middleware: Arc<dyn Middleware<P>>) -> Result<(), StoreError> {
        if self.inner.is_destroyed() {
            return Err(StoreError::Destroyed);
        }
        {
            let mut installed = write(&self.inner.middleware);
            if installed.iter().any(|existing| existing.name() == middleware.name()) {
                return Err(StoreError::MiddlewareConfig(format!(
                    "middleware '{}' is already installed",
                    middleware.name()
                )));
            }
            installed.push(middleware);
        }
        self.inner.recompose();
        Ok(())
    }

    /// Remove a middleware by name, tearing it down.
    ///
    /// Returns whether it was installed.
    pub fn remove_middleware(&self, name: &str) -> bool {
        let removed = {
            let mut installed = write(&self.inner.middleware);
            installed
                .iter()
                .position(|existing| existing.name() == name)
                .map(|index| installed.remove(index))
        };
        match removed {
            Some(middleware) => {
                self.inner.recompose();
                middleware.teardown();
                true
            },
            None => false,
        }
    }

    /// Register and start an effect.
    ///
    /// # Errors
    ///
    /// [`StoreError::MiddlewareConfig`] for an empty or duplicate name,
    /// [`StoreError::RuntimeUnavailable`] outside a Tokio runtime,
    /// [`StoreError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn add_effect<E: Effect<P>>(&self, name: impl Into<String>, effect: E, config: EffectConfig) -> Result<(), StoreError> {
        let name = name.into();
        tokio::runtime::Handle::try_current()
            .map_err(|_| StoreError::RuntimeUnavailable(format!("starting effect '{name}'")))?;
        if !self.inner.effects.is_started() {
            self.inner.effects.start(self.effect_sources())?;
        }
        self.inner.effects.register_shared(name, Arc::new(effect), config)
    }

    /// Stop and unregister an effect. Returns whether it was registered.
    pub fn remove_effect(&self, name: &str) -> bool {
        self.inner.effects.unregister(name)
    }

    /// Swap the reducer set.
    ///
    /// Branches whose key survives keep their current value; new branches are
    /// initialized; dropped keys disappear. Listeners are notified only if the tree
    /// changed.
    ///
    /// # Errors
    ///
    /// [`StoreError::NoReducers`] for an empty set,
    /// [`StoreError::UninitializedBranch`] if a new branch has no initial value,
    /// [`StoreError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn replace_reducer(&self, reducer: CombinedReducer<P>) -> Result<(), StoreError> {
        if reducer.is_empty() {
            return Err(StoreError::NoReducers);
        }
        let changed = {
            let _guard = lock(&self.inner.dispatch_lock);
            if self.inner.is_destroyed() {
                return Err(StoreError::Destroyed);
            }
            let previous = self.get_state();
            let next = reducer.reconcile(&previous)?;
            *write(&self.inner.reducer) = Arc::new(reducer);

            let changed =
                previous.len() != next.len() || next.keys().any(|key| !previous.branch_ptr_eq(&next, key));
            if changed {
                *write(&self.inner.state) = next.clone();
                ReducerMetrics::record_state_change();
                if let Some(sender) = lock(&self.inner.state_tx).as_ref() {
                    let _ = sender.send(next);
                }
            }
            changed
        };

        self.inner.logger.info("reducer replaced");
        if changed {
            self.inner.notify();
        }
        Ok(())
    }

    /// Tear everything down: stop effects, complete streams, release signals and
    /// listeners, tear down middleware. Idempotent.
    pub fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.effects.destroy();
        {
            let _guard = lock(&inner.dispatch_lock);
            *lock(&inner.action_tx) = None;
            *lock(&inner.state_tx) = None;
        }
        inner.signals.destroy();
        inner.listeners.clear();

        let middleware = std::mem::take(&mut *write(&inner.middleware));
        for layer in &middleware {
            layer.teardown();
        }
        inner.logger.info("store destroyed");
    }

    /// Whether [`destroy`](Self::destroy) has been called.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// Configuration and activity snapshot.
    #[must_use]
    pub fn info(&self) -> StoreInfo {
        let inner = &self.inner;
        let stream_subscribers = lock(&inner.action_tx)
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
            + lock(&inner.state_tx)
                .as_ref()
                .map_or(0, broadcast::Sender::receiver_count);
        StoreInfo {
            name: inner.config.name.clone(),
            environment: inner.probe.environment(),
            signals_enabled: inner.signals.is_available(),
            middleware_count: read(&inner.middleware).len(),
            effects_count: inner.effects.len(),
            effect_names: inner.effects.effect_names(),
            current_state: self.get_state(),
            has_active_subscriptions: inner.listeners.len() > 0
                || inner.signals.len() > 0
                || stream_subscribers > 0
                || inner.effects.has_running(),
            destroyed: inner.is_destroyed(),
        }
    }

    /// The configuration the store was built with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// The store's logger.
    #[must_use]
    pub fn logger(&self) -> &Logger {
        &self.inner.logger
    }

    fn effect_sources(&self) -> EffectSources<P> {
        let for_actions = Arc::downgrade(&self.inner);
        let for_states = Arc::downgrade(&self.inner);
        let for_dispatch = Arc::downgrade(&self.inner);
        EffectSources::new(
            move || match for_actions.upgrade() {
                Some(inner) => Self { inner }.action_stream(),
                None => stream::empty().boxed(),
            },
            move || match for_states.upgrade() {
                Some(inner) => Self { inner }.state_stream(),
                None => stream::empty().boxed(),
            },
            move |action| match for_dispatch.upgrade() {
                Some(inner) => inner.dispatch_input(action.into()).map(|_| ()),
                None => Err(StoreError::Destroyed),
            },
        )
    }
}

impl<P: ActionPayload> fmt::Debug for Store<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.config.name)
            .field("state", &self.get_state())
            .field("middleware", &read(&self.inner.middleware).len())
            .field("effects", &self.inner.effects)
            .field("signals", &self.inner.signals)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
