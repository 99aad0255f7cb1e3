//! Copy-on-write drafts for reducers.
//!
//! A reducer receives a [`Draft`] instead of the state itself. Reading goes straight
//! to the shared snapshot; the first mutable access clones it. On
//! [`finish`](Draft::finish) the draft hands back the *original* `Arc` when nothing
//! was written, or when the written copy compares equal to the original, so untouched
//! branches keep their reference identity.
//!
//! Nested sharing is opt-in: store large sub-structures as `Arc<T>` fields and mutate
//! them with [`Arc::make_mut`] so siblings that were not touched stay shared.
//!
//! ```
//! use std::sync::Arc;
//! use storex_core::draft::Draft;
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Counter { count: i64 }
//!
//! let base = Arc::new(Counter { count: 1 });
//!
//! let untouched = Draft::new(Arc::clone(&base)).finish();
//! assert!(Arc::ptr_eq(&base, &untouched));
//!
//! let mut draft = Draft::new(Arc::clone(&base));
//! draft.count += 1;
//! let next = draft.finish();
//! assert_eq!(next.count, 2);
//! assert!(!Arc::ptr_eq(&base, &next));
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Mutable view over a shared state snapshot, scoped to one reducer call.
#[derive(Debug)]
pub struct Draft<S> {
    base: Arc<S>,
    copy: Option<S>,
}

impl<S: Clone> Draft<S> {
    /// Start a draft over a snapshot.
    #[must_use]
    pub const fn new(base: Arc<S>) -> Self {
        Self { base, copy: None }
    }

    /// The snapshot this draft started from.
    #[must_use]
    pub fn original(&self) -> &S {
        &self.base
    }

    /// Whether a mutable access has happened.
    #[must_use]
    pub const fn is_touched(&self) -> bool {
        self.copy.is_some()
    }

    /// Replace the whole value.
    pub fn replace(&mut self, value: S) {
        self.copy = Some(value);
    }

    /// Throw away any writes made so far.
    pub fn revert(&mut self) {
        self.copy = None;
    }

    /// Reconcile the draft into an immutable snapshot.
    ///
    /// Returns the original `Arc` when the draft was never written to or the written
    /// value equals the original.
    #[must_use]
    pub fn finish(self) -> Arc<S>
    where
        S: PartialEq,
    {
        match self.copy {
            Some(copy) if copy != *self.base => Arc::new(copy),
            _ => self.base,
        }
    }
}

impl<S> Deref for Draft<S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.copy.as_ref().unwrap_or(&self.base)
    }
}

impl<S: Clone> DerefMut for Draft<S> {
    fn deref_mut(&mut self) -> &mut S {
        let base = &self.base;
        self.copy.get_or_insert_with(|| S::clone(base))
    }
}
