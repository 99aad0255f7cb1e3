//! Command ("thunk") middleware.

use super::{CommandBody, DispatchOutcome, DispatchResult, Dispatchable, Middleware, MiddlewareApi, Next};
use crate::error::StoreError;
use storex_core::action::ActionPayload;

/// Runs dispatched [`Command`](super::Command)s instead of forwarding them.
///
/// Synchronous commands run inline and their error becomes the dispatch error.
/// Asynchronous commands are spawned on the current Tokio runtime; their errors are
/// logged. Plain actions pass straight through.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThunkMiddleware;

impl ThunkMiddleware {
    /// Create the command middleware.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl<P: ActionPayload> Middleware<P> for ThunkMiddleware {
    fn name(&self) -> &str {
        "thunk"
    }

    fn applies_to(&self, input: &Dispatchable<P>) -> bool {
        matches!(input, Dispatchable::Command(_))
    }

    fn handle(&self, api: &MiddlewareApi<P>, input: Dispatchable<P>, next: &Next<P>) -> DispatchResult<P> {
        let command = match input {
            Dispatchable::Command(command) => command,
            action @ Dispatchable::Action(_) => return next.call(action),
        };
        let name = command.name;
        match command.body {
            CommandBody::Sync(run) => {
                api.logger().debug(format_args!("running command '{name}'"));
                run(api)?;
                Ok(DispatchOutcome::Executed)
            },
            CommandBody::Async(run) => {
                let runtime = tokio::runtime::Handle::try_current()
                    .map_err(|_| StoreError::RuntimeUnavailable(format!("async command '{name}'")))?;
                let api = api.clone();
                let logger = api.logger().clone();
                let future = run(api);
                runtime.spawn(async move {
                    if let Err(error) = future.await {
                        logger.error(format_args!("async command '{name}' failed: {error}"));
                    }
                });
                Ok(DispatchOutcome::Deferred)
            },
        }
    }
}
