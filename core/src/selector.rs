//! Memoized selectors.
//!
//! [`create_selector`] pairs a cheap input selector with an expensive projection. The
//! projection runs again only when the extracted input changes; reading the same
//! snapshot twice does not even run the input selector.

use crate::state::StateTree;
use crate::sync::lock;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct Cached<I, R> {
    state: StateTree,
    input: I,
    output: R,
}

/// A memoized `(input, projection)` pair. Clones share one cache.
pub struct Selector<I, R> {
    input: Arc<dyn Fn(&StateTree) -> I + Send + Sync>,
    project: Arc<dyn Fn(&I) -> R + Send + Sync>,
    cache: Arc<Mutex<Option<Cached<I, R>>>>,
    recomputations: Arc<AtomicUsize>,
}

/// Build a memoized selector.
///
/// ```
/// use std::sync::Arc;
/// use storex_core::selector::create_selector;
/// use storex_core::state::{Branch, StateTree};
///
/// let state = StateTree::from_branches(vec![
///     (Arc::from("items"), Arc::new(vec![3_u32, 4]) as Branch),
/// ]);
///
/// let total = create_selector(
///     |state: &StateTree| state.get_arc::<Vec<u32>>("items"),
///     |items: &Option<Arc<Vec<u32>>>| items.as_ref().map_or(0, |items| items.iter().sum::<u32>()),
/// );
///
/// assert_eq!(total.select(&state), 7);
/// assert_eq!(total.select(&state), 7);
/// assert_eq!(total.recomputations(), 1);
/// ```
pub fn create_selector<I, R, FI, FP>(input: FI, project: FP) -> Selector<I, R>
where
    FI: Fn(&StateTree) -> I + Send + Sync + 'static,
    FP: Fn(&I) -> R + Send + Sync + 'static,
{
    Selector {
        input: Arc::new(input),
        project: Arc::new(project),
        cache: Arc::new(Mutex::new(None)),
        recomputations: Arc::new(AtomicUsize::new(0)),
    }
}

impl<I, R> Selector<I, R>
where
    I: PartialEq,
    R: Clone,
{
    /// Evaluate against a snapshot.
    pub fn select(&self, state: &StateTree) -> R {
        let mut cache = lock(&self.cache);
        if let Some(cached) = cache.as_mut() {
            if cached.state.ptr_eq(state) {
                return cached.output.clone();
            }
            let input = (self.input)(state);
            if cached.input == input {
                cached.state = state.clone();
                return cached.output.clone();
            }
            return self.recompute(&mut cache, state, input);
        }
        let input = (self.input)(state);
        self.recompute(&mut cache, state, input)
    }

    fn recompute(&self, cache: &mut Option<Cached<I, R>>, state: &StateTree, input: I) -> R {
        let output = (self.project)(&input);
        self.recomputations.fetch_add(1, Ordering::Relaxed);
        *cache = Some(Cached {
            state: state.clone(),
            input,
            output: output.clone(),
        });
        output
    }
}

impl<I, R> Selector<I, R> {
    /// How many times the projection ran.
    #[must_use]
    pub fn recomputations(&self) -> usize {
        self.recomputations.load(Ordering::Relaxed)
    }

    /// Forget the cached result.
    pub fn reset(&self) {
        *lock(&self.cache) = None;
    }
}

impl<I, R> Clone for Selector<I, R> {
    fn clone(&self) -> Self {
        Self {
            input: Arc::clone(&self.input),
            project: Arc::clone(&self.project),
            cache: Arc::clone(&self.cache),
            recomputations: Arc::clone(&self.recomputations),
        }
    }
}

impl<I, R> fmt::Debug for Selector<I, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("recomputations", &self.recomputations())
            .finish_non_exhaustive()
    }
}

/// Selector returning one branch as a shared typed `Arc`.
///
/// Every call site yields the same closure type, so give signals built from it an
/// explicit key.
pub fn select_branch<T>(key: impl Into<Arc<str>>) -> impl Fn(&StateTree) -> Option<Arc<T>> + Clone + Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    let key: Arc<str> = key.into();
    move |state: &StateTree| state.get_arc::<T>(&key)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::state::Branch;

    #[derive(Debug, PartialEq)]
    struct Todos {
        items: Vec<(String, bool)>,
    }

    fn tree(todos: Todos, filter: &str) -> StateTree {
        StateTree::from_branches(vec![
            (Arc::from("todos"), Arc::new(todos) as Branch),
            (Arc::from("filter"), Arc::new(filter.to_string()) as Branch),
        ])
    }

    fn done_count() -> Selector<Option<Arc<Todos>>, usize> {
        create_selector(select_branch::<Todos>("todos"), |todos: &Option<Arc<Todos>>| {
            todos
                .as_ref()
                .map_or(0, |todos| todos.items.iter().filter(|(_, done)| *done).count())
        })
    }

    #[test]
    fn test_same_snapshot_skips_input() {
        let selector = done_count();
        let state = tree(
            Todos {
                items: vec![("a".into(), true), ("b".into(), false)],
            },
            "all",
        );
        assert_eq!(selector.select(&state), 1);
        assert_eq!(selector.select(&state.clone()), 1);
        assert_eq!(selector.recomputations(), 1);
    }

    #[test]
    fn test_unrelated_change_keeps_projection() {
        let selector = done_count();
        let s0 = tree(Todos { items: vec![] }, "all");
        let todos = s0.branch("todos").unwrap().clone();
        let s1 = StateTree::from_branches(vec![
            (Arc::from("todos"), todos),
            (Arc::from("filter"), Arc::new("done".to_string()) as Branch),
        ]);

        assert_eq!(selector.select(&s0), 0);
        assert_eq!(selector.select(&s1), 0);
        assert_eq!(selector.recomputations(), 1);
    }

    #[test]
    fn test_changed_input_recomputes() {
        let selector = done_count();
        let s0 = tree(Todos { items: vec![] }, "all");
        let s1 = tree(
            Todos {
                items: vec![("a".into(), true)],
            },
            "all",
        );
        assert_eq!(selector.select(&s0), 0);
        assert_eq!(selector.select(&s1), 1);
        assert_eq!(selector.recomputations(), 2);

        selector.reset();
        assert_eq!(selector.select(&s1), 1);
        assert_eq!(selector.recomputations(), 3);
    }
}
