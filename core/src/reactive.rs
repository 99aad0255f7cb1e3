//! Push and pull reactive primitives.
//!
//! The store publishes on push streams ([`ActionStream`], [`StateStream`]) and, where
//! the runtime supports it, mirrors selected state into pull cells. A [`PullCell`] is
//! read synchronously at any time; only the store holds its [`PullSetter`], so the
//! projection is one-directional.

use crate::action::Action;
use crate::state::StateTree;
use crate::sync::{lock, read, write};
use futures::stream::BoxStream;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Stream of dispatched actions, in dispatch order.
pub type ActionStream<P> = BoxStream<'static, Action<P>>;

/// Stream of state snapshots, in the order of the actions that produced them.
pub type StateStream = BoxStream<'static, StateTree>;

struct CellInner<T> {
    value: RwLock<T>,
    version: AtomicU64,
    active: AtomicBool,
}

/// Read side of a pull cell.
pub struct PullCell<T> {
    inner: Arc<CellInner<T>>,
}

/// Write side of a pull cell.
pub struct PullSetter<T> {
    inner: Arc<CellInner<T>>,
}

/// Create a pull cell seeded with `initial`.
pub fn pull_cell<T>(initial: T) -> (PullCell<T>, PullSetter<T>) {
    let inner = Arc::new(CellInner {
        value: RwLock::new(initial),
        version: AtomicU64::new(0),
        active: AtomicBool::new(true),
    });
    (
        PullCell {
            inner: Arc::clone(&inner),
        },
        PullSetter { inner },
    )
}

impl<T> PullCell<T> {
    /// Read the current value by reference.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = read(&self.inner.value);
        f(&*guard)
    }

    /// Number of accepted writes since creation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Whether the cell still receives updates.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Whether both handles read the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Derive a lazily recomputed memo from this cell.
    pub fn memo<U, F>(&self, compute: F) -> Memo<U>
    where
        T: Send + Sync + 'static,
        U: 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let versions = self.clone();
        let values = self.clone();
        Memo {
            version: Arc::new(move || versions.version()),
            compute: Arc::new(move || values.with(&compute)),
            cache: Arc::new(Mutex::new(None)),
            recomputations: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<T: Clone> PullCell<T> {
    /// Read a copy of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        read(&self.inner.value).clone()
    }
}

impl<T> Clone for PullCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PullCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullCell")
            .field("value", &*read(&self.inner.value))
            .field("version", &self.version())
            .field("active", &self.is_active())
            .finish()
    }
}

impl<T> PullSetter<T> {
    /// Store a value unconditionally.
    ///
    /// Ignored once the cell is deactivated.
    pub fn set(&self, value: T) -> bool {
        self.set_if(value, |_, _| false)
    }

    /// Store `value` unless `equals(current, value)` holds.
    ///
    /// Returns whether the value was written.
    pub fn set_if(&self, value: T, equals: impl Fn(&T, &T) -> bool) -> bool {
        if !self.inner.active.load(Ordering::Acquire) {
            return false;
        }
        let mut current = write(&self.inner.value);
        if equals(&current, &value) {
            return false;
        }
        *current = value;
        self.inner.version.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Stop accepting writes. The last value stays readable.
    pub fn deactivate(&self) {
        self.inner.active.store(false, Ordering::Release);
    }

    /// A read handle for the same cell.
    #[must_use]
    pub fn cell(&self) -> PullCell<T> {
        PullCell {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for PullSetter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullSetter")
            .field("version", &self.inner.version.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// A value derived from a pull cell, recomputed only after the cell changed.
pub struct Memo<U> {
    version: Arc<dyn Fn() -> u64 + Send + Sync>,
    compute: Arc<dyn Fn() -> U + Send + Sync>,
    cache: Arc<Mutex<Option<(u64, U)>>>,
    recomputations: Arc<AtomicUsize>,
}

impl<U: Clone> Memo<U> {
    /// The derived value for the cell's current version.
    #[must_use]
    pub fn get(&self) -> U {
        let version = (self.version)();
        let mut cache = lock(&self.cache);
        if let Some((cached_version, value)) = cache.as_ref() {
            if *cached_version == version {
                return value.clone();
            }
        }
        let value = (self.compute)();
        self.recomputations.fetch_add(1, Ordering::Relaxed);
        *cache = Some((version, value.clone()));
        value
    }
}

impl<U> Memo<U> {
    /// How many times the derivation ran.
    #[must_use]
    pub fn recomputations(&self) -> usize {
        self.recomputations.load(Ordering::Relaxed)
    }
}

impl<U> Clone for Memo<U> {
    fn clone(&self) -> Self {
        Self {
            version: Arc::clone(&self.version),
            compute: Arc::clone(&self.compute),
            cache: Arc::clone(&self.cache),
            recomputations: Arc::clone(&self.recomputations),
        }
    }
}

impl<U> fmt::Debug for Memo<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("recomputations", &self.recomputations())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_if_skips_equal_values() {
        let (cell, setter) = pull_cell(1);
        assert!(!setter.set_if(1, |a, b| a == b));
        assert_eq!(cell.version(), 0);

        assert!(setter.set_if(2, |a, b| a == b));
        assert_eq!(cell.get(), 2);
        assert_eq!(cell.version(), 1);
    }

    #[test]
    fn test_deactivated_cell_keeps_last_value() {
        let (cell, setter) = pull_cell("a".to_string());
        setter.deactivate();
        assert!(!setter.set("b".to_string()));
        assert_eq!(cell.get(), "a");
        assert!(!cell.is_active());
    }

    #[test]
    fn test_memo_recomputes_lazily() {
        let (cell, setter) = pull_cell(vec![1, 2, 3]);
        let total = cell.memo(|values: &Vec<i32>| values.iter().sum::<i32>());

        assert_eq!(total.recomputations(), 0);
        assert_eq!(total.get(), 6);
        assert_eq!(total.get(), 6);
        assert_eq!(total.recomputations(), 1);

        setter.set(vec![10]);
        setter.set(vec![10, 5]);
        assert_eq!(total.get(), 15);
        assert_eq!(total.recomputations(), 2);
    }

    #[test]
    fn test_setter_cell_shares_state() {
        let (cell, setter) = pull_cell(0_u8);
        assert!(cell.ptr_eq(&setter.cell()));
    }
}
