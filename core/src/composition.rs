//! Keyed reducer composition.
//!
//! A [`CombinedReducer`] owns one reducer per state key. Each branch is reduced
//! independently; a branch whose reducer left its draft untouched keeps its `Arc`, and
//! the whole [`StateTree`] is only rebuilt when at least one branch changed.
//!
//! Branches are initialized, reduced and enumerated in registration order.
//!
//! # Examples
//!
//! ```
//! use storex_core::action::Action;
//! use storex_core::composition::CombinedReducer;
//! use storex_core::reducer::reducer_fn;
//!
//! #[derive(Clone, Debug)]
//! enum AppAction { Rename(String), Tick }
//!
//! let combined = CombinedReducer::new()
//!     .branch("ticks", reducer_fn(0_u32, |state, action: &Action<AppAction>| {
//!         if let AppAction::Tick = action.payload() {
//!             **state += 1;
//!         }
//!         Ok(())
//!     }))
//!     .branch("name", reducer_fn(String::new(), |state, action: &Action<AppAction>| {
//!         if let AppAction::Rename(name) = action.payload() {
//!             **state = name.clone();
//!         }
//!         Ok(())
//!     }));
//!
//! let s0 = combined.initial_state().unwrap();
//! let tick = Action::new("TICK", AppAction::Tick).unwrap();
//! let s1 = combined.reduce(&s0, &tick).unwrap().state;
//!
//! assert_eq!(s1.get::<u32>("ticks"), Some(&1));
//! assert!(s1.branch_ptr_eq(&s0, "name"));
//! ```

use crate::action::{Action, ActionPayload};
use crate::reducer::{Reducer, ReducerError};
use crate::state::{Branch, StateTree, downcast_branch, downcast_branch_arc};
use crate::sync::panic_message;
use smallvec::SmallVec;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use thiserror::Error;

/// Registration and reduction failures of a [`CombinedReducer`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompositionError {
    /// A branch was registered under an empty key.
    #[error("reducer key must not be empty")]
    EmptyKey,

    /// Two branches were registered under the same key.
    #[error("duplicate reducer key: {0}")]
    DuplicateKey(String),

    /// A branch reducer produced no initial value.
    #[error("reducer for branch '{key}' returned no initial state")]
    UninitializedBranch {
        /// The offending key
        key: String,
    },

    /// A branch reducer returned an error.
    #[error("reducer for branch '{key}' failed: {source}")]
    ReducerFailed {
        /// The branch whose reducer failed
        key: String,
        /// The reducer's error
        source: ReducerError,
    },
}

/// Type-erased branch reducer.
///
/// Implemented for every [`Reducer`] through [`CombinedReducer::branch`]; implement it
/// directly only for branches whose value type is decided at runtime.
pub trait BranchReducer<P>: Send + Sync {
    /// The initial branch value, or `None` if the branch cannot be initialized.
    fn initial_branch(&self) -> Option<Branch>;

    /// Whether `branch` holds the value type this reducer works on.
    fn accepts(&self, branch: &Branch) -> bool;

    /// Reduce one branch.
    ///
    /// Returns `Ok(None)` when the branch holds a value this reducer cannot work on;
    /// the caller keeps the previous value.
    ///
    /// # Errors
    ///
    /// Returns the reducer's error.
    fn reduce_branch(&self, branch: &Branch, action: &Action<P>) -> Result<Option<Branch>, ReducerError>;

    /// Name of the branch value type, for diagnostics.
    fn state_type(&self) -> &'static str;
}

struct Typed<R>(R);

impl<R: Reducer> BranchReducer<R::Action> for Typed<R> {
    fn initial_branch(&self) -> Option<Branch> {
        self.0.initial_state().map(|state| Arc::new(state) as Branch)
    }

    fn accepts(&self, branch: &Branch) -> bool {
        downcast_branch::<R::State>(branch).is_some()
    }

    fn reduce_branch(
        &self,
        branch: &Branch,
        action: &Action<R::Action>,
    ) -> Result<Option<Branch>, ReducerError> {
        let Some(current) = downcast_branch_arc::<R::State>(branch) else {
            return Ok(None);
        };
        let next = self.0.reduce_snapshot(Arc::clone(&current), action)?;
        if Arc::ptr_eq(&current, &next) {
            Ok(Some(Arc::clone(branch)))
        } else {
            Ok(Some(next as Branch))
        }
    }

    fn state_type(&self) -> &'static str {
        std::any::type_name::<R::State>()
    }
}

/// Keys collected during one reduction.
pub type KeyList = SmallVec<[Arc<str>; 4]>;

/// Result of reducing a tree.
#[derive(Debug, Clone)]
pub struct Reduction {
    /// The next tree; reference-equal to the input when nothing changed.
    pub state: StateTree,
    /// Branches whose reference changed, in registration order.
    pub changed: KeyList,
    /// Branches that kept their previous value because no value was produced.
    pub missing: KeyList,
}

impl Reduction {
    /// Whether any branch changed.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        !self.changed.is_empty()
    }
}

/// Keyed composition of branch reducers.
pub struct CombinedReducer<P> {
    branches: Vec<(Arc<str>, Arc<dyn BranchReducer<P>>)>,
}

impl<P: ActionPayload> CombinedReducer<P> {
    /// An empty composition.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            branches: Vec::new(),
        }
    }

    /// Add a branch, replacing the reducer of an existing key in place.
    #[must_use]
    pub fn branch<R>(mut self, key: impl Into<Arc<str>>, reducer: R) -> Self
    where
        R: Reducer<Action = P>,
    {
        let key = key.into();
        let reducer: Arc<dyn BranchReducer<P>> = Arc::new(Typed(reducer));
        match self.position(&key) {
            Some(index) => self.branches[index].1 = reducer,
            None => self.branches.push((key, reducer)),
        }
        self
    }

    /// Add a branch, rejecting empty and duplicate keys.
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::EmptyKey`] or [`CompositionError::DuplicateKey`].
    pub fn register<R>(&mut self, key: impl Into<Arc<str>>, reducer: R) -> Result<(), CompositionError>
    where
        R: Reducer<Action = P>,
    {
        self.register_erased(key.into(), Arc::new(Typed(reducer)))
    }

    /// Add a type-erased branch, rejecting empty and duplicate keys.
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::EmptyKey`] or [`CompositionError::DuplicateKey`].
    pub fn register_erased(
        &mut self,
        key: Arc<str>,
        reducer: Arc<dyn BranchReducer<P>>,
    ) -> Result<(), CompositionError> {
        if key.trim().is_empty() {
            return Err(CompositionError::EmptyKey);
        }
        if self.position(&key).is_some() {
            return Err(CompositionError::DuplicateKey(key.to_string()));
        }
        self.branches.push((key, reducer));
        Ok(())
    }

    /// Move every branch of `other` into `self`.
    ///
    /// Stops at the first conflicting key; branches before it are kept.
    ///
    /// # Errors
    ///
    /// Returns the first registration error.
    pub fn merge(&mut self, other: Self) -> Result<(), CompositionError> {
        for (key, reducer) in other.branches {
            self.register_erased(key, reducer)?;
        }
        Ok(())
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.branches.iter().position(|(name, _)| name.as_ref() == key)
    }

    /// Registered keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.branches.iter().map(|(key, _)| key.as_ref())
    }

    /// Whether a branch is registered under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Number of branches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// Whether no branch is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Initialize every branch in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::UninitializedBranch`] for the first branch that
    /// yields no value.
    pub fn initial_state(&self) -> Result<StateTree, CompositionError> {
        let mut branches = Vec::with_capacity(self.branches.len());
        for (key, reducer) in &self.branches {
            let value = reducer
                .initial_branch()
                .ok_or_else(|| CompositionError::UninitializedBranch { key: key.to_string() })?;
            branches.push((Arc::clone(key), value));
        }
        Ok(StateTree::from_branches(branches))
    }

    /// Reduce every branch against one action.
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::ReducerFailed`] for the first failing or panicking
    /// branch; no partial result is produced.
    pub fn reduce(&self, state: &StateTree, action: &Action<P>) -> Result<Reduction, CompositionError> {
        let mut branches = Vec::with_capacity(self.branches.len());
        let mut changed = KeyList::new();
        let mut missing = KeyList::new();

        for (key, reducer) in &self.branches {
            let Some(previous) = state.branch(key) else {
                missing.push(Arc::clone(key));
                continue;
            };
            let next = catch_unwind(AssertUnwindSafe(|| reducer.reduce_branch(previous, action)))
                .unwrap_or_else(|payload| {
                    Err(ReducerError::new(format!(
                        "reducer panicked: {}",
                        panic_message(&*payload)
                    )))
                })
                .map_err(|source| CompositionError::ReducerFailed {
                    key: key.to_string(),
                    source,
                })?;
            match next {
                Some(next) => {
                    if !Arc::ptr_eq(previous, &next) {
                        changed.push(Arc::clone(key));
                    }
                    branches.push((Arc::clone(key), next));
                },
                None => {
                    missing.push(Arc::clone(key));
                    branches.push((Arc::clone(key), Arc::clone(previous)));
                },
            }
        }

        let state = if changed.is_empty() {
            state.clone()
        } else {
            StateTree::from_branches(branches)
        };
        Ok(Reduction {
            state,
            changed,
            missing,
        })
    }

    /// Build the tree for this composition from a previous one.
    ///
    /// Branches whose key survives and whose value type still fits are kept by
    /// reference; new or incompatible branches are initialized; removed keys are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::UninitializedBranch`] if a new branch yields no value.
    pub fn reconcile(&self, previous: &StateTree) -> Result<StateTree, CompositionError> {
        let mut branches = Vec::with_capacity(self.branches.len());
        for (key, reducer) in &self.branches {
            let value = match previous.branch(key) {
                Some(existing) if reducer.accepts(existing) => Arc::clone(existing),
                _ => reducer
                    .initial_branch()
                    .ok_or_else(|| CompositionError::UninitializedBranch { key: key.to_string() })?,
            };
            branches.push((Arc::clone(key), value));
        }
        Ok(StateTree::from_branches(branches))
    }
}

impl<P: ActionPayload> Default for CombinedReducer<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Clone for CombinedReducer<P> {
    fn clone(&self) -> Self {
        Self {
            branches: self.branches.clone(),
        }
    }
}

impl<P> fmt::Debug for CombinedReducer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.branches
                    .iter()
                    .map(|(key, reducer)| (key, reducer.state_type())),
            )
            .finish()
    }
}
