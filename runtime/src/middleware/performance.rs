//! Dispatch timing middleware.

use super::{DispatchResult, Dispatchable, Middleware, MiddlewareApi, MiddlewareOptions, Next};
use crate::metrics::DispatchMetrics;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storex_core::action::ActionPayload;

type TimingCallback = Arc<dyn Fn(&ActionTiming) + Send + Sync>;

/// Duration of one dispatch through the rest of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTiming {
    /// Action type or command name.
    pub action_type: String,
    /// Wall-clock time spent downstream, reducers included.
    pub duration: Duration,
    /// When the dispatch finished.
    pub timestamp: DateTime<Utc>,
}

/// Options for [`PerformanceMiddleware`].
#[derive(Clone)]
pub struct PerformanceOptions {
    /// Dispatches slower than this are reported as slow.
    pub slow_threshold: Duration,
    /// Record a histogram sample and call `on_metrics` for every dispatch.
    pub record_all: bool,
    /// Called for every slow dispatch.
    pub on_slow: Option<TimingCallback>,
    /// Called for every dispatch when `record_all` is set.
    pub on_metrics: Option<TimingCallback>,
    /// Shared enable flag and action filter.
    pub options: MiddlewareOptions,
}

impl Default for PerformanceOptions {
    fn default() -> Self {
        Self {
            slow_threshold: Duration::from_millis(16),
            record_all: false,
            on_slow: None,
            on_metrics: None,
            options: MiddlewareOptions::default(),
        }
    }
}

impl fmt::Debug for PerformanceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceOptions")
            .field("slow_threshold", &self.slow_threshold)
            .field("record_all", &self.record_all)
            .field("on_slow", &self.on_slow.is_some())
            .field("on_metrics", &self.on_metrics.is_some())
            .field("options", &self.options)
            .finish()
    }
}

/// Measures how long the downstream chain takes.
#[derive(Debug, Clone, Default)]
pub struct PerformanceMiddleware {
    options: PerformanceOptions,
}

impl PerformanceMiddleware {
    /// Create with explicit options.
    #[must_use]
    pub const fn new(options: PerformanceOptions) -> Self {
        Self { options }
    }

    /// Report dispatches slower than `threshold` to `on_slow`.
    #[must_use]
    pub fn with_threshold<F>(threshold: Duration, on_slow: F) -> Self
    where
        F: Fn(&ActionTiming) + Send + Sync + 'static,
    {
        Self::new(PerformanceOptions {
            slow_threshold: threshold,
            on_slow: Some(Arc::new(on_slow)),
            ..PerformanceOptions::default()
        })
    }
}

impl<P: ActionPayload> Middleware<P> for PerformanceMiddleware {
    fn name(&self) -> &str {
        "performance"
    }

    fn applies_to(&self, input: &Dispatchable<P>) -> bool {
        self.options.options.applies_to(input)
    }

    fn handle(&self, api: &MiddlewareApi<P>, input: Dispatchable<P>, next: &Next<P>) -> DispatchResult<P> {
        let action_type = input.label().to_string();
        let started = Instant::now();
        let result = next.call(input);
        let timing = ActionTiming {
            action_type,
            duration: started.elapsed(),
            timestamp: Utc::now(),
        };

        if timing.duration > self.options.slow_threshold {
            DispatchMetrics::record_slow(&timing.action_type);
            api.logger().warn(format_args!(
                "slow dispatch: {} took {:?} (threshold {:?})",
                timing.action_type, timing.duration, self.options.slow_threshold
            ));
            if let Some(on_slow) = &self.options.on_slow {
                (**on_slow)(&timing);
            }
        }

        if self.options.record_all {
            DispatchMetrics::record_duration(&timing.action_type, timing.duration);
            if let Some(on_metrics) = &self.options.on_metrics {
                (**on_metrics)(&timing);
            }
        }

        result
    }
}
