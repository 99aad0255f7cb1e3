//! Runs registered effects and feeds their output back into the store.

use super::operators::of_type;
use super::{Effect, EffectConfig};
use crate::error::StoreError;
use crate::metrics::EffectMetrics;
use futures::{FutureExt, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use storex_core::action::{Action, ActionPayload};
use storex_core::logger::Logger;
use storex_core::reactive::{ActionStream, StateStream};
use storex_core::sync::{lock, panic_message};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Receives `(error, effect_name, triggering_action)` for every failed effect.
pub type EffectErrorCallback<P> = Arc<dyn Fn(&StoreError, &str, Option<&Action<P>>) + Send + Sync>;

type ActionSource<P> = Arc<dyn Fn() -> ActionStream<P> + Send + Sync>;
type StateSource = Arc<dyn Fn() -> StateStream + Send + Sync>;
type DispatchSink<P> = Arc<dyn Fn(Action<P>) -> Result<(), StoreError> + Send + Sync>;

/// Where effects read from and write to.
///
/// Each started effect gets fresh streams from the two factories.
pub struct EffectSources<P> {
    actions: ActionSource<P>,
    states: StateSource,
    dispatch: DispatchSink<P>,
}

impl<P: ActionPayload> EffectSources<P> {
    /// Bundle stream factories and a dispatch function.
    pub fn new<A, S, D>(actions: A, states: S, dispatch: D) -> Self
    where
        A: Fn() -> ActionStream<P> + Send + Sync + 'static,
        S: Fn() -> StateStream + Send + Sync + 'static,
        D: Fn(Action<P>) -> Result<(), StoreError> + Send + Sync + 'static,
    {
        Self {
            actions: Arc::new(actions),
            states: Arc::new(states),
            dispatch: Arc::new(dispatch),
        }
    }
}

impl<P> Clone for EffectSources<P> {
    fn clone(&self) -> Self {
        Self {
            actions: Arc::clone(&self.actions),
            states: Arc::clone(&self.states),
            dispatch: Arc::clone(&self.dispatch),
        }
    }
}

impl<P> fmt::Debug for EffectSources<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EffectSources")
    }
}

struct Registration<P> {
    name: String,
    effect: Arc<dyn Effect<P>>,
    config: EffectConfig,
}

/// Reports one effect's failure through the logger, metrics and callback.
struct FailureReporter<P> {
    name: String,
    logger: Logger,
    on_error: Option<EffectErrorCallback<P>>,
    last_trigger: Arc<Mutex<Option<Action<P>>>>,
}

impl<P: ActionPayload> FailureReporter<P> {
    fn report(&self, message: String) {
        let error = StoreError::EffectExecution {
            effect: self.name.clone(),
            message,
        };
        EffectMetrics::record_failure(&self.name);
        self.logger.error(&error);
        if let Some(on_error) = &self.on_error {
            let trigger = lock(&self.last_trigger).clone();
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (**on_error)(&error, &self.name, trigger.as_ref()))) {
                self.logger.error(format_args!(
                    "effect error callback panicked: {}",
                    panic_message(&*payload)
                ));
            }
        }
    }
}

/// Subscribes effects to the store's streams and dispatches what they emit.
///
/// Every effect runs as its own Tokio task inside an error boundary: an `Err` item or
/// a panic is reported and ends that effect only. Effects registered after
/// [`start`](Self::start) begin immediately on the same sources.
pub struct EffectOrchestrator<P: ActionPayload> {
    registrations: Mutex<Vec<Registration<P>>>,
    running: Mutex<HashMap<String, JoinHandle<()>>>,
    sources: Mutex<Option<EffectSources<P>>>,
    shutdown: watch::Sender<bool>,
    logger: Logger,
    on_error: Option<EffectErrorCallback<P>>,
    destroyed: AtomicBool,
}

impl<P: ActionPayload> EffectOrchestrator<P> {
    /// An orchestrator with no effects.
    #[must_use]
    pub fn new(logger: Logger) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registrations: Mutex::new(Vec::new()),
            running: Mutex::new(HashMap::new()),
            sources: Mutex::new(None),
            shutdown,
            logger,
            on_error: None,
            destroyed: AtomicBool::new(false),
        }
    }

    /// Install a global failure callback.
    #[must_use]
    pub fn with_error_callback(mut self, callback: Option<EffectErrorCallback<P>>) -> Self {
        self.on_error = callback;
        self
    }

    /// Register an effect under a unique name.
    ///
    /// # Errors
    ///
    /// [`StoreError::MiddlewareConfig`] for an empty or duplicate name,
    /// [`StoreError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn register<E: Effect<P>>(&self, name: impl Into<String>, effect: E, config: EffectConfig) -> Result<(), StoreError> {
        self.register_shared(name.into(), Arc::new(effect), config)
    }

    pub(crate) fn register_shared(
        &self,
        name: String,
        effect: Arc<dyn Effect<P>>,
        config: EffectConfig,
    ) -> Result<(), StoreError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(StoreError::Destroyed);
        }
        if name.trim().is_empty() {
            return Err(StoreError::MiddlewareConfig("effect name must not be empty".to_string()));
        }

        let key = name.clone();
        let registration = Registration { name, effect, config };
        {
            let mut registrations = lock(&self.registrations);
            if registrations.iter().any(|existing| existing.name == registration.name) {
                return Err(StoreError::MiddlewareConfig(format!(
                    "effect '{}' is already registered",
                    registration.name
                )));
            }
            registrations.push(registration);
        }

        let sources = lock(&self.sources).clone();
        if let Some(sources) = sources {
            let registrations = lock(&self.registrations);
            if let Some(registration) = registrations.iter().find(|registration| registration.name == key) {
                self.launch(registration, &sources)?;
            }
        }
        Ok(())
    }

    /// Remove an effect, cancelling it if running.
    ///
    /// Returns whether an effect with that name was registered.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = {
            let mut registrations = lock(&self.registrations);
            let before = registrations.len();
            registrations.retain(|registration| registration.name != name);
            registrations.len() != before
        };
        if let Some(task) = lock(&self.running).remove(name) {
            task.abort();
        }
        if removed {
            self.logger.debug(format_args!("effect '{name}' unregistered"));
        }
        removed
    }

    /// Subscribe every enabled effect to `sources`.
    ///
    /// # Errors
    ///
    /// [`StoreError::RuntimeUnavailable`] outside a Tokio runtime,
    /// [`StoreError::Destroyed`] after [`destroy`](Self::destroy).
    pub fn start(&self, sources: EffectSources<P>) -> Result<(), StoreError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(StoreError::Destroyed);
        }
        self.shutdown.send_replace(false);
        *lock(&self.sources) = Some(sources.clone());

        let registrations = lock(&self.registrations);
        for registration in registrations.iter() {
            self.launch(registration, &sources)?;
        }
        Ok(())
    }

    /// Cancel every running effect. Registrations are kept.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        *lock(&self.sources) = None;
        for (_, task) in lock(&self.running).drain() {
            task.abort();
        }
    }

    /// Stop and drop every registration. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop();
        lock(&self.registrations).clear();
    }

    /// Registered effect names, in registration order.
    #[must_use]
    pub fn effect_names(&self) -> Vec<String> {
        lock(&self.registrations)
            .iter()
            .map(|registration| registration.name.clone())
            .collect()
    }

    /// Number of registered effects.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.registrations).len()
    }

    /// Whether no effect is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`start`](Self::start) has been called since the last stop.
    #[must_use]
    pub fn is_started(&self) -> bool {
        lock(&self.sources).is_some()
    }

    /// Whether the named effect has a live task.
    #[must_use]
    pub fn is_running(&self, name: &str) -> bool {
        lock(&self.running).get(name).is_some_and(|task| !task.is_finished())
    }

    /// Whether any effect has a live task.
    #[must_use]
    pub fn has_running(&self) -> bool {
        lock(&self.running).values().any(|task| !task.is_finished())
    }

    fn launch(&self, registration: &Registration<P>, sources: &EffectSources<P>) -> Result<(), StoreError> {
        if !registration.config.enabled {
            return Ok(());
        }
        let name = registration.name.clone();
        if self.is_running(&name) {
            return Ok(());
        }
        let runtime = Handle::try_current()
            .map_err(|_| StoreError::RuntimeUnavailable(format!("starting effect '{name}'")))?;

        let reporter = FailureReporter {
            name: name.clone(),
            logger: self.logger.scoped(&name),
            on_error: self.on_error.clone(),
            last_trigger: Arc::new(Mutex::new(None)),
        };

        let last_trigger = Arc::clone(&reporter.last_trigger);
        let actions = of_type((*sources.actions)(), registration.config.filter.clone())
            .inspect(move |action| *lock(&last_trigger) = Some(action.clone()))
            .boxed();
        let states = (*sources.states)();

        let effect = Arc::clone(&registration.effect);
        let mut output = match catch_unwind(AssertUnwindSafe(|| effect.run(actions, states))) {
            Ok(output) => output,
            Err(payload) => {
                reporter.report(format!("effect panicked while starting: {}", panic_message(&*payload)));
                return Ok(());
            },
        };

        let dispatch = Arc::clone(&sources.dispatch);
        let mut shutdown = self.shutdown.subscribe();
        let task = runtime.spawn(async move {
            reporter.logger.debug("effect started");
            loop {
                let next = tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    },
                    next = AssertUnwindSafe(output.next()).catch_unwind() => next,
                };

                match next {
                    Ok(Some(Ok(action))) => {
                        let action_type = action.action_type().to_string();
                        EffectMetrics::record_dispatched(&reporter.name);
                        match (*dispatch)(action) {
                            Ok(()) => {},
                            Err(StoreError::Destroyed) => break,
                            Err(error) => reporter
                                .logger
                                .warn(format_args!("dispatch of {action_type} from effect failed: {error}")),
                        }
                    },
                    Ok(Some(Err(error))) => {
                        reporter.report(error.message().to_string());
                        break;
                    },
                    Ok(None) => {
                        reporter.logger.debug("effect completed");
                        break;
                    },
                    Err(payload) => {
                        reporter.report(format!("effect panicked: {}", panic_message(&*payload)));
                        break;
                    },
                }
            }
        });

        lock(&self.running).insert(name, task);
        Ok(())
    }
}

impl<P: ActionPayload> Drop for EffectOrchestrator<P> {
    fn drop(&mut self) {
        for (_, task) in lock(&self.running).drain() {
            task.abort();
        }
    }
}

impl<P: ActionPayload> fmt::Debug for EffectOrchestrator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOrchestrator")
            .field("effects", &self.effect_names())
            .field("started", &lock(&self.sources).is_some())
            .field("destroyed", &self.destroyed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
