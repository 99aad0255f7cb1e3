//! Stream operators for writing effects.
//!
//! The `*_map` operators run an async function per source item and differ only in how
//! they treat an item that arrives while earlier futures are still pending; see
//! [`ExecutionStrategy`].

use super::ExecutionStrategy;
use async_stream::stream;
use futures::StreamExt;
use futures::future;
use futures::stream::{BoxStream, FusedStream};
use std::future::Future;
use std::pin::Pin;
use storex_core::action::{ActionFilter, ActionPayload};
use storex_core::reactive::ActionStream;

enum Step<T, U> {
    Source(Option<T>),
    Output(U),
}

/// Keep only actions whose type passes `filter`.
pub fn of_type<P: ActionPayload>(actions: ActionStream<P>, filter: ActionFilter) -> ActionStream<P> {
    actions
        .filter(move |action| future::ready(filter.matches(action.action_type().as_str())))
        .boxed()
}

/// Pair every source item with the most recent value of `latest`.
///
/// Pending `latest` values are drained before each source item is emitted, so an
/// item sees every snapshot that was already available when it was processed.
/// `None` means `latest` has not produced anything yet.
pub fn with_latest_from<A, S>(source: BoxStream<'static, A>, latest: BoxStream<'static, S>) -> BoxStream<'static, (A, Option<S>)>
where
    A: Send + 'static,
    S: Clone + Send + 'static,
{
    stream! {
        let mut source = source;
        let mut latest = latest.fuse();
        let mut current: Option<S> = None;
        loop {
            let step = tokio::select! {
                biased;
                Some(value) = latest.next(), if !latest.is_terminated() => Step::Output(value),
                item = source.next() => Step::Source(item),
            };
            match step {
                Step::Output(value) => current = Some(value),
                Step::Source(Some(item)) => yield (item, current.clone()),
                Step::Source(None) => break,
            }
        }
    }
    .boxed()
}

/// Run `f` for the latest item only; a new item cancels the pending future.
pub fn switch_map<T, U, F, Fut>(source: BoxStream<'static, T>, f: F) -> BoxStream<'static, U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = U> + Send + 'static,
{
    single_flight(source, f, true)
}

/// Run `f` for an item only if nothing is pending; items arriving meanwhile are dropped.
pub fn exhaust_map<T, U, F, Fut>(source: BoxStream<'static, T>, f: F) -> BoxStream<'static, U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = U> + Send + 'static,
{
    single_flight(source, f, false)
}

/// Run `f` for every item concurrently, yielding results as they complete.
pub fn merge_map<T, U, F, Fut>(source: BoxStream<'static, T>, f: F) -> BoxStream<'static, U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = U> + Send + 'static,
{
    source.map(f).buffer_unordered(usize::MAX).boxed()
}

/// Run `f` for every item, one at a time, in source order.
pub fn concat_map<T, U, F, Fut>(source: BoxStream<'static, T>, f: F) -> BoxStream<'static, U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = U> + Send + 'static,
{
    source.then(f).boxed()
}

/// Dispatch to the operator for `strategy`.
pub fn apply_strategy<T, U, F, Fut>(strategy: ExecutionStrategy, source: BoxStream<'static, T>, f: F) -> BoxStream<'static, U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = U> + Send + 'static,
{
    match strategy {
        ExecutionStrategy::Switch => switch_map(source, f),
        ExecutionStrategy::Merge => merge_map(source, f),
        ExecutionStrategy::Concat => concat_map(source, f),
        ExecutionStrategy::Exhaust => exhaust_map(source, f),
    }
}

// At most one future in flight. `replace` selects switch (true) or exhaust (false).
fn single_flight<T, U, F, Fut>(source: BoxStream<'static, T>, f: F, replace: bool) -> BoxStream<'static, U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = U> + Send + 'static,
{
    stream! {
        let mut source = source.fuse();
        let mut f = f;
        let mut pending: Option<Pin<Box<Fut>>> = None;
        loop {
            let step = match pending.as_mut() {
                Some(running) if !source.is_terminated() => tokio::select! {
                    biased;
                    output = running => Step::Output(output),
                    item = source.next() => Step::Source(item),
                },
                Some(running) => Step::Output(running.await),
                None => Step::Source(source.next().await),
            };
            match step {
                Step::Output(output) => {
                    pending = None;
                    yield output;
                },
                Step::Source(Some(item)) => {
                    if replace || pending.is_none() {
                        pending = Some(Box::pin(f(item)));
                    }
                },
                Step::Source(None) if pending.is_none() => break,
                Step::Source(None) => {},
            }
        }
    }
    .boxed()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;
    use storex_core::action::Action;

    // Items spaced 10ms apart; handlers take `item * 15ms`.
    fn spaced(items: Vec<u64>) -> BoxStream<'static, u64> {
        stream::iter(items)
            .then(|item| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                item
            })
            .boxed()
    }

    async fn slow(item: u64) -> u64 {
        tokio::time::sleep(Duration::from_millis(item * 15)).await;
        item
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_keeps_latest_only() {
        let out: Vec<u64> = switch_map(spaced(vec![3, 3, 1]), slow).collect().await;
        assert_eq!(out, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaust_ignores_while_busy() {
        let out: Vec<u64> = exhaust_map(spaced(vec![3, 1, 1]), slow).collect().await;
        assert_eq!(out, vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_yields_in_completion_order() {
        let out: Vec<u64> = merge_map(spaced(vec![4, 1]), slow).collect().await;
        assert_eq!(out, vec![1, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concat_preserves_order() {
        let out: Vec<u64> = concat_map(spaced(vec![4, 1]), slow).collect().await;
        assert_eq!(out, vec![4, 1]);
    }

    #[tokio::test]
    async fn test_of_type_filters() {
        let actions = stream::iter(vec![
            Action::new("A", ()).unwrap(),
            Action::new("B", ()).unwrap(),
            Action::new("A", ()).unwrap(),
        ])
        .boxed();
        let kept: Vec<_> = of_type(actions, ActionFilter::types(["A"])).collect().await;
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn test_with_latest_from_before_any_value() {
        let pairs: Vec<_> = with_latest_from(stream::iter(vec![1]).boxed(), stream::pending::<u8>().boxed())
            .collect()
            .await;
        assert_eq!(pairs, vec![(1, None)]);
    }
}
