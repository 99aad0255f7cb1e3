//! Fluent construction of a [`Store`].

use crate::config::StoreConfig;
use crate::effects::{Effect, EffectConfig, EffectErrorCallback};
use crate::error::StoreError;
use crate::middleware::Middleware;
use crate::store::{Store, StoreParts};
use std::fmt;
use std::sync::Arc;
use storex_core::Reducer;
use storex_core::action::{Action, ActionPayload};
use storex_core::composition::CombinedReducer;
use storex_core::environment::{CapabilityProbe, StaticProbe};

/// Accumulates reducers, middleware and effects, then builds a [`Store`].
///
/// Registration mistakes (empty or duplicate keys and names) are collected and the
/// first one is returned from [`build`](Self::build), so the chain never breaks.
///
/// ```
/// use storex_core::{Draft, Reducer, ReducerError, Action};
/// use storex_runtime::StoreBuilder;
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct Count(i64);
///
/// struct CountReducer;
///
/// impl Reducer for CountReducer {
///     type State = Count;
///     type Action = ();
///
///     fn initial_state(&self) -> Option<Count> {
///         Some(Count(0))
///     }
///
///     fn reduce(&self, draft: &mut Draft<Count>, action: &Action<()>) -> Result<(), ReducerError> {
///         if action.is("INCREMENT") {
///             draft.0 += 1;
///         }
///         Ok(())
///     }
/// }
///
/// let store = StoreBuilder::new().register_reducer("count", CountReducer).build().unwrap();
/// store.dispatch(Action::new("INCREMENT", ()).unwrap()).unwrap();
/// assert_eq!(store.get_state().get::<Count>("count"), Some(&Count(1)));
/// ```
pub struct StoreBuilder<P: ActionPayload> {
    config: StoreConfig,
    probe: Arc<dyn CapabilityProbe>,
    reducer: CombinedReducer<P>,
    middleware: Vec<Arc<dyn Middleware<P>>>,
    effects: Vec<(String, Arc<dyn Effect<P>>, EffectConfig)>,
    on_effect_error: Option<EffectErrorCallback<P>>,
    errors: Vec<StoreError>,
}

impl<P: ActionPayload> StoreBuilder<P> {
    /// An empty builder with default configuration and a client probe.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
            probe: Arc::new(StaticProbe::default()),
            reducer: CombinedReducer::new(),
            middleware: Vec::new(),
            effects: Vec::new(),
            on_effect_error: None,
            errors: Vec::new(),
        }
    }

    /// Use this configuration.
    #[must_use]
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this capability probe.
    #[must_use]
    pub fn with_probe<C: CapabilityProbe + 'static>(mut self, probe: C) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    /// Add a reducer under `key`.
    #[must_use]
    pub fn register_reducer<R>(mut self, key: &str, reducer: R) -> Self
    where
        R: Reducer<Action = P>,
    {
        if let Err(error) = self.reducer.register(key, reducer) {
            self.errors.push(error.into());
        }
        self
    }

    /// Add every branch of a prepared composition.
    #[must_use]
    pub fn register_reducers(mut self, reducers: CombinedReducer<P>) -> Self {
        if let Err(error) = self.reducer.merge(reducers) {
            self.errors.push(error.into());
        }
        self
    }

    /// Append a middleware. The first one applied is the outermost.
    #[must_use]
    pub fn apply_middleware<M: Middleware<P>>(mut self, middleware: M) -> Self {
        let name = middleware.name().to_string();
        if self.middleware.iter().any(|existing| existing.name() == name) {
            self.errors
                .push(StoreError::MiddlewareConfig(format!("middleware '{name}' is already applied")));
        } else {
            self.middleware.push(Arc::new(middleware));
        }
        self
    }

    /// Register an effect that sees every action.
    #[must_use]
    pub fn register_effect<E: Effect<P>>(self, name: &str, effect: E) -> Self {
        self.register_effect_with(name, effect, EffectConfig::default())
    }

    /// Register an effect with explicit options.
    #[must_use]
    pub fn register_effect_with<E: Effect<P>>(mut self, name: &str, effect: E, config: EffectConfig) -> Self {
        if name.trim().is_empty() {
            self.errors
                .push(StoreError::MiddlewareConfig("effect name must not be empty".to_string()));
        } else if self.effects.iter().any(|(existing, _, _)| existing == name) {
            self.errors
                .push(StoreError::MiddlewareConfig(format!("effect '{name}' is already registered")));
        } else {
            self.effects.push((name.to_string(), Arc::new(effect), config));
        }
        self
    }

    /// Receive `(error, effect_name, triggering_action)` for every failed effect.
    #[must_use]
    pub fn on_effect_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&StoreError, &str, Option<&Action<P>>) + Send + Sync + 'static,
    {
        self.on_effect_error = Some(Arc::new(callback));
        self
    }

    /// Build the store and start its effects.
    ///
    /// # Errors
    ///
    /// - the first registration error
    /// - [`StoreError::Config`] for an invalid configuration
    /// - [`StoreError::NoReducers`] if no reducer was registered
    /// - [`StoreError::UninitializedBranch`] if a reducer has no initial state
    /// - [`StoreError::RuntimeUnavailable`] if effects were registered outside a Tokio runtime
    pub fn build(self) -> Result<Store<P>, StoreError> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }
        self.config.validate()?;
        if self.reducer.is_empty() {
            return Err(StoreError::NoReducers);
        }
        Store::from_parts(StoreParts {
            config: self.config,
            probe: self.probe,
            reducer: self.reducer,
            middleware: self.middleware,
            effects: self.effects,
            on_effect_error: self.on_effect_error,
        })
    }
}

impl<P: ActionPayload> Default for StoreBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ActionPayload> fmt::Debug for StoreBuilder<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("config", &self.config)
            .field("probe", &self.probe)
            .field("reducers", &self.reducer)
            .field(
                "middleware",
                &self.middleware.iter().map(|m| m.name().to_string()).collect::<Vec<_>>(),
            )
            .field(
                "effects",
                &self.effects.iter().map(|(name, _, _)| name.as_str()).collect::<Vec<_>>(),
            )
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}
