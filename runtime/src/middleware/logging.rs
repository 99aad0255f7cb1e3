//! Dispatch logging middleware.

use super::{DispatchResult, Dispatchable, Middleware, MiddlewareApi, MiddlewareOptions, Next};
use std::time::Instant;
use storex_core::action::{ActionFilter, ActionPayload};
use storex_core::logger::LogLevel;

/// What the logging middleware prints.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Level for the before/after lines. Failures are always logged at `error`.
    pub level: LogLevel,
    /// Include the action payload in the "before" line.
    pub include_payload: bool,
    /// Include the downstream duration in the "after" line.
    pub include_timing: bool,
    /// Include the post-dispatch state in the "after" line.
    pub include_state: bool,
    /// Shared enable flag and action filter.
    pub options: MiddlewareOptions,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_payload: true,
            include_timing: true,
            include_state: false,
            options: MiddlewareOptions::default(),
        }
    }
}

/// Logs every dispatch before and after the rest of the chain runs.
#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware {
    options: LoggingOptions,
}

impl LoggingMiddleware {
    /// Create with explicit options.
    #[must_use]
    pub const fn new(options: LoggingOptions) -> Self {
        Self { options }
    }

    /// Log only the listed action types.
    #[must_use]
    pub fn only<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut options = LoggingOptions::default();
        options.options.filter = ActionFilter::types(types);
        Self { options }
    }
}

impl<P: ActionPayload> Middleware<P> for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    fn applies_to(&self, input: &Dispatchable<P>) -> bool {
        self.options.options.applies_to(input)
    }

    fn handle(&self, api: &MiddlewareApi<P>, input: Dispatchable<P>, next: &Next<P>) -> DispatchResult<P> {
        let logger = api.logger();
        let level = self.options.level;
        let label = input.label().to_string();

        match (&input, self.options.include_payload) {
            (Dispatchable::Action(action), true) => logger.log(
                level,
                format_args!("dispatching {label} [{}] {:?}", action.id(), action.payload()),
            ),
            (Dispatchable::Action(action), false) => {
                logger.log(level, format_args!("dispatching {label} [{}]", action.id()));
            },
            (Dispatchable::Command(_), _) => logger.log(level, format_args!("running command {label}")),
        }

        let started = Instant::now();
        let result = next.call(input);
        let elapsed = started.elapsed();

        match &result {
            Ok(outcome) => {
                let timing = if self.options.include_timing {
                    format!(" in {elapsed:?}")
                } else {
                    String::new()
                };
                logger.log(level, format_args!("dispatched {label}{timing}: {outcome:?}"));
                if self.options.include_state {
                    logger.log(level, format_args!("state after {label}: {:?}", api.get_state()));
                }
            },
            Err(error) => logger.error(format_args!("dispatch of {label} failed after {elapsed:?}: {error}")),
        }

        result
    }
}
