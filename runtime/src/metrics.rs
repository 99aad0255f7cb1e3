//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the store's moving parts:
//! - Dispatch throughput and latency
//! - Reducer execution and failures
//! - State change notifications
//! - Effect feedback and failures
//!
//! Recording goes through the `metrics` facade, so nothing is collected until a
//! recorder is installed. [`MetricsExporter`] installs a Prometheus recorder.
//!
//! # Example
//!
//! ```rust,no_run
//! use storex_runtime::metrics::MetricsExporter;
//!
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! // ... run the application ...
//!
//! if let Some(text) = exporter.render() {
//!     println!("{text}");
//! }
//! # Ok::<(), storex_runtime::metrics::MetricsError>(())
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Total dispatches that reached the reducers.
pub const DISPATCH_TOTAL: &str = "store.dispatch.total";
/// Wall-clock duration of the downstream chain, recorded by the performance middleware.
pub const DISPATCH_DURATION: &str = "store.dispatch.duration_seconds";
/// Dispatches above the slow-action threshold.
pub const DISPATCH_SLOW: &str = "store.dispatch.slow";
/// Time spent inside the composed reducer.
pub const REDUCER_DURATION: &str = "store.reducer.duration_seconds";
/// Reducer failures and panics.
pub const REDUCER_ERRORS: &str = "store.reducer.errors";
/// State-stream emissions.
pub const STATE_CHANGES: &str = "store.state.changes";
/// Actions fed back by effects.
pub const EFFECTS_DISPATCHED: &str = "store.effects.dispatched";
/// Effect failures and panics.
pub const EFFECTS_ERRORS: &str = "store.effects.errors";

const DURATION_BUCKETS: &[f64] = &[
    0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
];

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus exporter for store metrics.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder globally.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or a different recorder is
    /// already installed.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        describe_metrics();

        match prometheus_builder()?.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Store metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn prometheus_builder() -> Result<PrometheusBuilder, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .map_err(|e| MetricsError::Build(e.to_string()))
}

/// Build a Prometheus recorder without installing it.
///
/// Useful with [`metrics::with_local_recorder`] in tests and benchmarks.
///
/// # Errors
///
/// Returns error if the bucket configuration is rejected.
pub fn prometheus_recorder() -> Result<PrometheusRecorder, MetricsError> {
    Ok(prometheus_builder()?.build_recorder())
}

/// Register all metric descriptions with the current recorder.
pub fn describe_metrics() {
    describe_counter!(DISPATCH_TOTAL, "Total number of actions that reached the reducers");
    describe_histogram!(DISPATCH_DURATION, "Time taken by the downstream dispatch chain");
    describe_counter!(DISPATCH_SLOW, "Total number of dispatches above the slow threshold");
    describe_histogram!(REDUCER_DURATION, "Time taken to execute the composed reducer");
    describe_counter!(REDUCER_ERRORS, "Total number of reducer errors and panics");
    describe_counter!(STATE_CHANGES, "Total number of state changes emitted");
    describe_counter!(EFFECTS_DISPATCHED, "Total number of actions dispatched by effects");
    describe_counter!(EFFECTS_ERRORS, "Total number of effect errors and panics");
}

/// Dispatch metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a dispatch that reached the reducers.
    pub fn record_dispatch(action_type: &str) {
        counter!(DISPATCH_TOTAL, "action_type" => action_type.to_string()).increment(1);
    }

    /// Record the duration of a timed dispatch.
    pub fn record_duration(action_type: &str, duration: Duration) {
        histogram!(DISPATCH_DURATION, "action_type" => action_type.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a dispatch above the slow threshold.
    pub fn record_slow(action_type: &str) {
        counter!(DISPATCH_SLOW, "action_type" => action_type.to_string()).increment(1);
    }
}

/// Reducer metrics recorder.
pub struct ReducerMetrics;

impl ReducerMetrics {
    /// Record a reducer pass.
    pub fn record_execution(duration: Duration) {
        histogram!(REDUCER_DURATION).record(duration.as_secs_f64());
    }

    /// Record a reducer error or panic.
    pub fn record_error(branch: &str) {
        counter!(REDUCER_ERRORS, "branch" => branch.to_string()).increment(1);
    }

    /// Record a state-stream emission.
    pub fn record_state_change() {
        counter!(STATE_CHANGES).increment(1);
    }
}

/// Effect metrics recorder.
pub struct EffectMetrics;

impl EffectMetrics {
    /// Record an action fed back by an effect.
    pub fn record_dispatched(effect: &str) {
        counter!(EFFECTS_DISPATCHED, "effect" => effect.to_string()).increment(1);
    }

    /// Record an effect failure.
    pub fn record_failure(effect: &str) {
        counter!(EFFECTS_ERRORS, "effect" => effect.to_string()).increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_exporter_starts_uninstalled() {
        let exporter = MetricsExporter::new();
        assert!(exporter.handle().is_none());
        assert!(exporter.render().is_none());
    }

    #[test]
    fn test_local_recorder_renders_store_metrics() {
        let recorder = prometheus_recorder().unwrap();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_metrics();
            DispatchMetrics::record_dispatch("INCREMENT");
            DispatchMetrics::record_duration("INCREMENT", Duration::from_micros(40));
            ReducerMetrics::record_error("counter");
            EffectMetrics::record_dispatched("loader");
        });

        let rendered = handle.render();
        assert!(rendered.contains("store_dispatch_total"));
        assert!(rendered.contains("action_type=\"INCREMENT\""));
        assert!(rendered.contains("store_dispatch_duration_seconds"));
        assert!(rendered.contains("store_reducer_errors"));
        assert!(rendered.contains("store_effects_dispatched"));
    }
}
