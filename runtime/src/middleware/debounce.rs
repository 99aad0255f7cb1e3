//! Debounce middleware.

use super::{DispatchOutcome, DispatchResult, Dispatchable, Middleware, MiddlewareApi, MiddlewareOptions, Next};
use crate::error::StoreError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storex_core::action::{ActionFilter, ActionPayload};
use storex_core::sync::lock;
use tokio::task::AbortHandle;

#[derive(Debug, Default)]
struct Pending {
    generation: u64,
    timer: Option<AbortHandle>,
}

/// Holds matching actions until their type has been quiet for `wait`.
///
/// Each action type is debounced independently. A newer action of the same type
/// supersedes the pending one; only the most recent is forwarded, unchanged. The
/// dispatch itself returns [`DispatchOutcome::Deferred`] immediately.
#[derive(Debug, Clone)]
pub struct DebounceMiddleware {
    wait: Duration,
    options: MiddlewareOptions,
    pending: Arc<Mutex<HashMap<String, Pending>>>,
}

impl DebounceMiddleware {
    /// Debounce the action types accepted by `filter`.
    #[must_use]
    pub fn new(wait: Duration, filter: ActionFilter) -> Self {
        Self {
            wait,
            options: MiddlewareOptions {
                enabled: true,
                filter,
            },
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Debounce only the listed action types.
    #[must_use]
    pub fn for_types<I, S>(wait: Duration, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(wait, ActionFilter::types(types))
    }

    /// Enable or disable the middleware.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.options.enabled = enabled;
        self
    }

    /// Number of action types with a pending timer.
    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.pending).values().filter(|p| p.timer.is_some()).count()
    }
}

impl<P: ActionPayload> Middleware<P> for DebounceMiddleware {
    fn name(&self) -> &str {
        "debounce"
    }

    fn applies_to(&self, input: &Dispatchable<P>) -> bool {
        matches!(input, Dispatchable::Action(_)) && self.options.applies_to(input)
    }

    fn handle(&self, api: &MiddlewareApi<P>, input: Dispatchable<P>, next: &Next<P>) -> DispatchResult<P> {
        let action = match input {
            Dispatchable::Action(action) => action,
            command @ Dispatchable::Command(_) => return next.call(command),
        };
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| StoreError::RuntimeUnavailable(format!("debouncing '{}'", action.action_type())))?;

        let action_type = action.action_type().to_string();
        let mut pending = lock(&self.pending);
        let slot = pending.entry(action_type.clone()).or_default();
        slot.generation += 1;
        let generation = slot.generation;
        if let Some(previous) = slot.timer.take() {
            previous.abort();
        }

        let wait = self.wait;
        let next = next.clone();
        let logger = api.logger().clone();
        let timers = Arc::clone(&self.pending);
        let task = runtime.spawn(async move {
            tokio::time::sleep(wait).await;
            {
                let mut timers = lock(&timers);
                match timers.get_mut(&action_type) {
                    Some(slot) if slot.generation == generation => slot.timer = None,
                    _ => return,
                }
            }
            if let Err(error) = next.call(Dispatchable::Action(action)) {
                logger.warn(format_args!("debounced {action_type} failed: {error}"));
            }
        });
        slot.timer = Some(task.abort_handle());
        drop(pending);

        Ok(DispatchOutcome::Deferred)
    }

    fn teardown(&self) {
        for (_, slot) in lock(&self.pending).drain() {
            if let Some(timer) = slot.timer {
                timer.abort();
            }
        }
    }
}
