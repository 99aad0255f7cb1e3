//! Dispatch Pipeline Benchmarks
//!
//! Measures the hot paths of the store:
//! - Reducer execution through a draft (changed and unchanged)
//! - `dispatch` with and without a middleware chain
//! - Signal updates on dispatch
//! - Dispatch with a running effect
//!
//! Run with: `cargo bench -p storex-runtime`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup
#![allow(clippy::unwrap_used)]

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use storex_core::action::{Action, ActionFilter};
use storex_core::reducer::Reducer;
use storex_core::state::StateTree;
use storex_runtime::effects::{AsyncEffect, ExecutionStrategy};
use storex_runtime::middleware::{ErrorHandlingMiddleware, LoggingMiddleware, PerformanceMiddleware, PerformanceOptions};
use storex_runtime::signals::SelectOptions;
use storex_testing::fixtures::{
    AppAction, CounterReducer, CounterState, act, app_builder, count, counter_builder,
};

fn benchmark_reducer(c: &mut Criterion) {
    let mut group = c.benchmark_group("reducer");
    group.throughput(Throughput::Elements(1));

    let reducer = CounterReducer;
    let increment = act(AppAction::Increment);
    let unknown = act(AppAction::Unknown);

    group.bench_function("changed", |b| {
        let state = Arc::new(CounterState { count: 0 });
        b.iter(|| reducer.reduce_snapshot(Arc::clone(&state), black_box(&increment)));
    });

    group.bench_function("unchanged", |b| {
        let state = Arc::new(CounterState { count: 0 });
        b.iter(|| reducer.reduce_snapshot(Arc::clone(&state), black_box(&unknown)));
    });

    group.finish();
}

fn benchmark_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    group.bench_function("increment", |b| {
        let store = counter_builder().build().expect("store");
        b.iter(|| store.dispatch(black_box(act(AppAction::Increment))));
    });

    group.bench_function("no_op", |b| {
        let store = app_builder().build().expect("store");
        b.iter(|| store.dispatch(black_box(act(AppAction::Unknown))));
    });

    group.bench_function("with_listener", |b| {
        let store = counter_builder().build().expect("store");
        let _subscription = store.subscribe(|state| {
            black_box(count(state));
        });
        b.iter(|| store.dispatch(black_box(act(AppAction::Increment))));
    });

    group.finish();
}

fn benchmark_middleware_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("middleware_chain");
    group.throughput(Throughput::Elements(1));

    for depth in [0_usize, 1, 3] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let mut builder = counter_builder();
            if depth >= 1 {
                builder = builder.apply_middleware(ErrorHandlingMiddleware::<AppAction>::rethrowing());
            }
            if depth >= 3 {
                builder = builder
                    .apply_middleware(LoggingMiddleware::default())
                    .apply_middleware(PerformanceMiddleware::new(PerformanceOptions::default()));
            }
            let store = builder.build().expect("store");
            b.iter(|| store.dispatch(black_box(act(AppAction::Increment))));
        });
    }

    group.finish();
}

fn benchmark_signals(c: &mut Criterion) {
    let mut group = c.benchmark_group("signals");
    group.throughput(Throughput::Elements(1));

    group.bench_function("dispatch_with_signal", |b| {
        let store = app_builder().build().expect("store");
        let counter = store.select(count, SelectOptions::default()).expect("signal");
        b.iter(|| {
            store.dispatch(act(AppAction::Increment)).unwrap();
            black_box(counter.latest())
        });
    });

    group.bench_function("memo_read", |b| {
        let store = app_builder().build().expect("store");
        let doubled = store
            .select_memo(count, |value: &i64| value * 2, SelectOptions::default())
            .expect("memo");
        b.iter(|| black_box(doubled.get()));
    });

    group.finish();
}

fn benchmark_effects(c: &mut Criterion) {
    let mut group = c.benchmark_group("effects");
    group.throughput(Throughput::Elements(1));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    group.bench_function("dispatch_with_effect", |b| {
        let store = runtime.block_on(async {
            app_builder()
                .register_effect(
                    "finish-loading",
                    AsyncEffect::new(
                        ExecutionStrategy::Switch,
                        ActionFilter::types(["ADD_ITEM"]),
                        |_action: Action<AppAction>, _state: StateTree| async {
                            Ok(Some(act(AppAction::SetLoading(false))))
                        },
                    ),
                )
                .build()
                .expect("store")
        });

        b.to_async(&runtime).iter(|| async {
            let _ = store.dispatch(black_box(act(AppAction::AddItem("x".into()))));
            tokio::task::yield_now().await;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_reducer,
    benchmark_dispatch,
    benchmark_middleware_chain,
    benchmark_signals,
    benchmark_effects
);
criterion_main!(benches);
