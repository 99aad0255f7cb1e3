//! The composed state tree.
//!
//! A [`StateTree`] maps string keys to independently reduced branches. Branches are
//! type-erased `Arc`s so that untouched branches are shared between successive trees;
//! the tree itself is an `Arc` too, which makes "did anything change?" a pointer
//! comparison.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Values that can live in a state branch.
///
/// Blanket-implemented for every `Debug + Send + Sync + 'static` type.
pub trait StateValue: Any + fmt::Debug + Send + Sync {
    /// Borrow as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Convert an `Arc` of this value into an `Arc<dyn Any>` for downcasting.
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T> StateValue for T
where
    T: Any + fmt::Debug + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A type-erased state branch.
pub type Branch = Arc<dyn StateValue>;

/// Downcast a branch by reference.
///
/// Goes through `&dyn StateValue` explicitly: calling `as_any` on the `Arc` itself
/// would resolve to the blanket impl for `Arc<dyn StateValue>`.
#[must_use]
pub fn downcast_branch<T: 'static>(branch: &Branch) -> Option<&T> {
    let value: &dyn StateValue = &**branch;
    value.as_any().downcast_ref::<T>()
}

/// Downcast a branch into a typed `Arc`, sharing the allocation.
#[must_use]
pub fn downcast_branch_arc<T>(branch: &Branch) -> Option<Arc<T>>
where
    T: Send + Sync + 'static,
{
    Arc::clone(branch).into_any_arc().downcast::<T>().ok()
}

/// Immutable snapshot of the whole application state.
///
/// Cloning is cheap (one `Arc` increment). Two snapshots taken without an intervening
/// state change are [`ptr_eq`](StateTree::ptr_eq).
#[derive(Clone)]
pub struct StateTree {
    branches: Arc<Vec<(Arc<str>, Branch)>>,
}

impl StateTree {
    /// A tree with no branches.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            branches: Arc::new(Vec::new()),
        }
    }

    /// Build a tree from branches in key enumeration order.
    #[must_use]
    pub fn from_branches(branches: Vec<(Arc<str>, Branch)>) -> Self {
        Self {
            branches: Arc::new(branches),
        }
    }

    /// Borrow a branch as a concrete type.
    #[must_use]
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.branch(key).and_then(downcast_branch::<T>)
    }

    /// Get a branch as a shared typed `Arc`.
    #[must_use]
    pub fn get_arc<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.branch(key).and_then(downcast_branch_arc::<T>)
    }

    /// The raw branch stored under `key`.
    #[must_use]
    pub fn branch(&self, key: &str) -> Option<&Branch> {
        self.branches
            .iter()
            .find(|(name, _)| name.as_ref() == key)
            .map(|(_, branch)| branch)
    }

    /// Keys in enumeration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.branches.iter().map(|(key, _)| key.as_ref())
    }

    /// Iterate over `(key, branch)` pairs in enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Branch)> {
        self.branches.iter().map(|(key, branch)| (key.as_ref(), branch))
    }

    /// Number of branches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// Whether the tree has no branches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Reference identity of two snapshots.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.branches, &other.branches)
    }

    /// Whether the branch under `key` is the same allocation in both trees.
    #[must_use]
    pub fn branch_ptr_eq(&self, other: &Self, key: &str) -> bool {
        match (self.branch(key), other.branch(key)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Default for StateTree {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for StateTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.branches.iter().map(|(key, branch)| (key, branch)))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Counter {
        count: i64,
    }

    fn tree() -> StateTree {
        StateTree::from_branches(vec![
            (Arc::from("counter"), Arc::new(Counter { count: 3 }) as Branch),
            (Arc::from("label"), Arc::new("hello".to_string()) as Branch),
        ])
    }

    #[test]
    fn test_typed_access() {
        let state = tree();
        assert_eq!(state.get::<Counter>("counter"), Some(&Counter { count: 3 }));
        assert_eq!(state.get::<String>("label").map(String::as_str), Some("hello"));
        assert!(state.get::<Counter>("label").is_none());
        assert!(state.get::<Counter>("missing").is_none());
    }

    #[test]
    fn test_get_arc_shares_allocation() {
        let state = tree();
        let a = state.get_arc::<Counter>("counter").unwrap();
        let b = state.get_arc::<Counter>("counter").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_keys_keep_order() {
        let state = tree();
        assert_eq!(state.keys().collect::<Vec<_>>(), vec!["counter", "label"]);
    }

    #[test]
    fn test_clone_is_same_reference() {
        let state = tree();
        let copy = state.clone();
        assert!(state.ptr_eq(&copy));
        assert!(state.branch_ptr_eq(&copy, "counter"));
        assert!(!state.ptr_eq(&tree()));
    }

    #[test]
    fn test_debug_lists_branches() {
        let rendered = format!("{:?}", tree());
        assert!(rendered.contains("counter"));
        assert!(rendered.contains("count: 3"));
    }
}
