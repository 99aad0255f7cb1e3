//! Signal projector: cached pull-cell views of the state tree.
//!
//! A signal mirrors `selector(state)` into a [`PullCell`] that can be read
//! synchronously. Each signal is cached under a [`SignalKey`] for the lifetime of the
//! store, so asking twice for the same key returns the same cell. Where the runtime
//! cannot host pull cells, or signals are disabled, every request yields `None` and
//! callers fall back to [`Store::select_state`](crate::Store::select_state).

use crate::error::StoreError;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use storex_core::environment::CapabilityProbe;
use storex_core::logger::Logger;
use storex_core::reactive::{Memo, PullCell, PullSetter, pull_cell};
use storex_core::state::StateTree;
use storex_core::sync::{lock, panic_message};

type Equality<R> = Arc<dyn Fn(&R, &R) -> bool + Send + Sync>;
type Updater = Arc<dyn Fn(&StateTree) + Send + Sync>;

/// Options for `select` and `select_memo`.
pub struct SelectOptions<R> {
    /// Cache key. Without one the key is derived from the selector's type.
    pub key: Option<String>,
    /// Custom equality; updates that compare equal are dropped. Defaults to `==`.
    pub equals: Option<Equality<R>>,
}

impl<R> SelectOptions<R> {
    /// Cache under an explicit key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Use a custom equality function.
    #[must_use]
    pub fn with_equals<F>(mut self, equals: F) -> Self
    where
        F: Fn(&R, &R) -> bool + Send + Sync + 'static,
    {
        self.equals = Some(Arc::new(equals));
        self
    }
}

impl<R> Default for SelectOptions<R> {
    fn default() -> Self {
        Self { key: None, equals: None }
    }
}

impl<R> Clone for SelectOptions<R> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            equals: self.equals.clone(),
        }
    }
}

impl<R> fmt::Debug for SelectOptions<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectOptions")
            .field("key", &self.key)
            .field("equals", &self.equals.is_some())
            .finish()
    }
}

/// Identity of a cached signal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SignalKey {
    /// A caller-supplied key.
    Explicit(String),
    /// Derived from the selector's concrete type.
    ///
    /// Every closure literal has its own type, so one call site maps to one key.
    Derived {
        /// Type id of the selector (and compute function, for memos).
        type_id: TypeId,
        /// Readable name of that type, for logs.
        type_name: &'static str,
    },
    /// The memo derived from the signal under the inner key.
    Memo(Box<SignalKey>),
}

impl SignalKey {
    fn derived<T: 'static>() -> Self {
        Self::Derived {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit(key) => f.write_str(key),
            Self::Derived { type_name, .. } => write!(f, "<{type_name}>"),
            Self::Memo(inner) => write!(f, "memo({inner})"),
        }
    }
}

/// Read handle for a projected signal.
pub struct PullHandle<R> {
    cell: PullCell<R>,
    key: SignalKey,
}

impl<R: Clone> PullHandle<R> {
    /// The latest projected value.
    #[must_use]
    pub fn latest(&self) -> R {
        self.cell.get()
    }
}

impl<R> PullHandle<R> {
    /// Read the latest value by reference.
    pub fn with<T>(&self, f: impl FnOnce(&R) -> T) -> T {
        self.cell.with(f)
    }

    /// The underlying cell.
    #[must_use]
    pub const fn cell(&self) -> &PullCell<R> {
        &self.cell
    }

    /// The cache key.
    #[must_use]
    pub const fn key(&self) -> &SignalKey {
        &self.key
    }

    /// Number of accepted updates since creation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.cell.version()
    }

    /// Whether both handles read the same cached signal.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.cell.ptr_eq(&other.cell)
    }
}

impl<R> Clone for PullHandle<R> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            key: self.key.clone(),
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for PullHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullHandle")
            .field("key", &self.key)
            .field("cell", &self.cell)
            .finish()
    }
}

/// Read handle for a memoized signal.
pub struct MemoHandle<U> {
    memo: Memo<U>,
    key: SignalKey,
}

impl<U: Clone> MemoHandle<U> {
    /// The derived value, recomputed only if the source signal changed.
    #[must_use]
    pub fn get(&self) -> U {
        self.memo.get()
    }
}

impl<U> MemoHandle<U> {
    /// How many times the derivation ran.
    #[must_use]
    pub fn recomputations(&self) -> usize {
        self.memo.recomputations()
    }

    /// The cache key.
    #[must_use]
    pub const fn key(&self) -> &SignalKey {
        &self.key
    }
}

impl<U> Clone for MemoHandle<U> {
    fn clone(&self) -> Self {
        Self {
            memo: self.memo.clone(),
            key: self.key.clone(),
        }
    }
}

impl<U> fmt::Debug for MemoHandle<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoHandle")
            .field("key", &self.key)
            .field("memo", &self.memo)
            .finish()
    }
}

struct Entry {
    handle: Box<dyn Any + Send + Sync>,
    update: Updater,
    teardown: Box<dyn Fn() + Send + Sync>,
}

struct Projection<R> {
    cell: PullCell<R>,
    update: Updater,
    teardown: Box<dyn Fn() + Send + Sync>,
}

/// Owns every signal created by one store.
pub(crate) struct SignalProjector {
    enabled: bool,
    probe: Arc<dyn CapabilityProbe>,
    logger: Logger,
    destroyed: AtomicBool,
    entries: Mutex<HashMap<SignalKey, Entry>>,
}

impl SignalProjector {
    pub(crate) fn new(enabled: bool, probe: Arc<dyn CapabilityProbe>, logger: Logger) -> Self {
        Self {
            enabled,
            probe,
            logger,
            destroyed: AtomicBool::new(false),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether signals can be created right now.
    pub(crate) fn is_available(&self) -> bool {
        self.enabled && self.probe.is_pull_capable() && !self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub(crate) fn create_signal<R, S>(
        &self,
        current: impl Fn() -> StateTree,
        selector: S,
        options: SelectOptions<R>,
    ) -> Option<PullHandle<R>>
    where
        R: Clone + PartialEq + Send + Sync + 'static,
        S: Fn(&StateTree) -> R + Send + Sync + 'static,
    {
        if !self.is_available() || self.rejects_callable::<R>() {
            return None;
        }
        let key = options.key.map_or_else(SignalKey::derived::<S>, SignalKey::Explicit);

        let (handle, update) = {
            let mut entries = lock(&self.entries);
            if let Some(entry) = entries.get(&key) {
                return self.cached(&key, entry);
            }
            let projection = self.project(&key, &current(), selector, options.equals)?;
            let handle = PullHandle {
                cell: projection.cell,
                key: key.clone(),
            };
            entries.insert(
                key,
                Entry {
                    handle: Box::new(handle.clone()),
                    update: Arc::clone(&projection.update),
                    teardown: projection.teardown,
                },
            );
            (handle, projection.update)
        };

        // a dispatch may have landed between seeding and registration
        (*update)(&current());
        Some(handle)
    }

    pub(crate) fn create_memo_signal<R, S, U, C>(
        &self,
        current: impl Fn() -> StateTree,
        selector: S,
        compute: C,
        options: SelectOptions<R>,
    ) -> Option<MemoHandle<U>>
    where
        R: Clone + PartialEq + Send + Sync + 'static,
        S: Fn(&StateTree) -> R + Send + Sync + 'static,
        U: Clone + Send + Sync + 'static,
        C: Fn(&R) -> U + Send + Sync + 'static,
    {
        if !self.is_available() || self.rejects_callable::<R>() || self.rejects_callable::<U>() {
            return None;
        }
        let inner = options.key.map_or_else(SignalKey::derived::<(S, C)>, SignalKey::Explicit);
        let key = SignalKey::Memo(Box::new(inner));

        let (handle, update) = {
            let mut entries = lock(&self.entries);
            if let Some(entry) = entries.get(&key) {
                return self.cached(&key, entry);
            }
            let projection = self.project(&key, &current(), selector, options.equals)?;
            let handle = MemoHandle {
                memo: projection.cell.memo(compute),
                key: key.clone(),
            };
            entries.insert(
                key,
                Entry {
                    handle: Box::new(handle.clone()),
                    update: Arc::clone(&projection.update),
                    teardown: projection.teardown,
                },
            );
            (handle, projection.update)
        };

        (*update)(&current());
        Some(handle)
    }

    /// Push a new snapshot into every signal.
    pub(crate) fn on_state(&self, state: &StateTree) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        let updaters: Vec<Updater> = lock(&self.entries)
            .values()
            .map(|entry| Arc::clone(&entry.update))
            .collect();
        for update in updaters {
            (*update)(state);
        }
    }

    /// Deactivate and release every signal. Further requests yield `None`.
    pub(crate) fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let entries: Vec<Entry> = lock(&self.entries).drain().map(|(_, entry)| entry).collect();
        let released = entries.len();
        for entry in entries {
            (*entry.teardown)();
        }
        self.logger.debug(format_args!("released {released} signal(s)"));
    }

    fn cached<H: Clone + 'static>(&self, key: &SignalKey, entry: &Entry) -> Option<H> {
        let handle = entry.handle.downcast_ref::<H>().cloned();
        if handle.is_none() {
            self.logger.warn(StoreError::SignalProjection(format!(
                "signal {key} is cached with a different value type than {}",
                type_name::<H>()
            )));
        }
        handle
    }

    fn rejects_callable<R>(&self) -> bool {
        let name = type_name::<R>();
        let callable = name.contains("{{closure}}")
            || name.starts_with("fn(")
            || name.starts_with("for<")
            || (name.contains("dyn ") && name.contains("Fn"));
        if callable {
            self.logger.warn(StoreError::SignalProjection(format!(
                "selector returns a callable ({name}); use select_memo to derive values instead"
            )));
        }
        callable
    }

    fn project<R, S>(
        &self,
        key: &SignalKey,
        state: &StateTree,
        selector: S,
        equals: Option<Equality<R>>,
    ) -> Option<Projection<R>>
    where
        R: Clone + PartialEq + Send + Sync + 'static,
        S: Fn(&StateTree) -> R + Send + Sync + 'static,
    {
        let seed = match catch_unwind(AssertUnwindSafe(|| selector(state))) {
            Ok(seed) => seed,
            Err(payload) => {
                self.logger.warn(StoreError::SignalProjection(format!(
                    "selector for {key} panicked: {}",
                    panic_message(&*payload)
                )));
                return None;
            },
        };

        let (cell, setter) = pull_cell(seed);
        let setter: Arc<PullSetter<R>> = Arc::new(setter);
        let equals: Equality<R> = equals.unwrap_or_else(|| Arc::new(|a: &R, b: &R| a == b));
        let logger = self.logger.clone();
        let label = key.to_string();
        let writer = Arc::clone(&setter);

        let update: Updater = Arc::new(move |state: &StateTree| {
            match catch_unwind(AssertUnwindSafe(|| selector(state))) {
                Ok(value) => {
                    writer.set_if(value, |a, b| (*equals)(a, b));
                },
                Err(payload) => logger.warn(format_args!(
                    "selector for {label} panicked, keeping last value: {}",
                    panic_message(&*payload)
                )),
            }
        });

        Some(Projection {
            cell,
            update,
            teardown: Box::new(move || setter.deactivate()),
        })
    }
}

impl fmt::Debug for SignalProjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalProjector")
            .field("enabled", &self.enabled)
            .field("probe", &self.probe)
            .field("signals", &self.len())
            .field("destroyed", &self.destroyed.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use storex_core::environment::StaticProbe;
    use storex_core::logger::LogLevel;
    use storex_core::state::Branch;

    fn projector(probe: StaticProbe) -> SignalProjector {
        SignalProjector::new(true, Arc::new(probe), Logger::new("test", LogLevel::Error))
    }

    fn tree(count: i64) -> StateTree {
        StateTree::from_branches(vec![(Arc::from("count"), Arc::new(count) as Branch)])
    }

    fn count(state: &StateTree) -> i64 {
        state.get::<i64>("count").copied().unwrap_or_default()
    }

    #[test]
    fn test_signal_follows_state() {
        let projector = projector(StaticProbe::test());
        let handle = projector
            .create_signal(|| tree(1), count, SelectOptions::default())
            .unwrap();
        assert_eq!(handle.latest(), 1);

        projector.on_state(&tree(5));
        assert_eq!(handle.latest(), 5);
        projector.on_state(&tree(5));
        assert_eq!(handle.version(), 1);
    }

    #[test]
    fn test_same_key_returns_cached_cell() {
        let projector = projector(StaticProbe::test());
        let first = projector
            .create_signal(|| tree(1), count, SelectOptions::default().with_key("count"))
            .unwrap();
        let second = projector
            .create_signal(|| tree(2), |_: &StateTree| 0_i64, SelectOptions::default().with_key("count"))
            .unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(projector.len(), 1);
    }

    #[test]
    fn test_type_mismatch_on_cached_key_yields_none() {
        let projector = projector(StaticProbe::test());
        let _first = projector
            .create_signal(|| tree(1), count, SelectOptions::default().with_key("k"))
            .unwrap();
        let second = projector.create_signal(
            || tree(1),
            |_: &StateTree| "text".to_string(),
            SelectOptions::default().with_key("k"),
        );
        assert!(second.is_none());
    }

    #[test]
    fn test_no_pull_support_degrades_to_none() {
        let projector = projector(StaticProbe::server());
        assert!(
            projector
                .create_signal(|| tree(1), count, SelectOptions::default())
                .is_none()
        );
        assert_eq!(projector.len(), 0);
    }

    #[test]
    fn test_panicking_selector_degrades_to_none() {
        let projector = projector(StaticProbe::test());
        let handle = projector.create_signal(
            || tree(1),
            |_: &StateTree| -> i64 { panic!("bad selector") },
            SelectOptions::default(),
        );
        assert!(handle.is_none());
        assert_eq!(projector.len(), 0);
    }

    fn zero() -> i64 {
        0
    }

    #[test]
    fn test_callable_results_rejected() {
        let projector = projector(StaticProbe::test());
        let handle = projector.create_signal(
            || tree(1),
            |_: &StateTree| zero as fn() -> i64,
            SelectOptions::default(),
        );
        assert!(handle.is_none());
    }

    #[test]
    fn test_custom_equality_suppresses_updates() {
        let projector = projector(StaticProbe::test());
        let handle = projector
            .create_signal(
                || tree(1),
                count,
                SelectOptions::default().with_equals(|a: &i64, b: &i64| a % 2 == b % 2),
            )
            .unwrap();

        projector.on_state(&tree(3));
        assert_eq!(handle.latest(), 1);
        projector.on_state(&tree(4));
        assert_eq!(handle.latest(), 4);
    }

    #[test]
    fn test_memo_signal_recomputes_on_change_only() {
        let projector = projector(StaticProbe::test());
        let doubled = projector
            .create_memo_signal(|| tree(2), count, |n: &i64| n * 2, SelectOptions::default())
            .unwrap();

        assert_eq!(doubled.get(), 4);
        assert_eq!(doubled.get(), 4);
        projector.on_state(&tree(2));
        assert_eq!(doubled.get(), 4);
        assert_eq!(doubled.recomputations(), 1);

        projector.on_state(&tree(10));
        assert_eq!(doubled.get(), 20);
        assert_eq!(doubled.recomputations(), 2);
    }

    #[test]
    fn test_destroy_deactivates_and_blocks_new_signals() {
        let projector = projector(StaticProbe::test());
        let handle = projector
            .create_signal(|| tree(1), count, SelectOptions::default())
            .unwrap();

        projector.destroy();
        projector.on_state(&tree(9));

        assert_eq!(handle.latest(), 1);
        assert!(!handle.cell().is_active());
        assert!(
            projector
                .create_signal(|| tree(1), count, SelectOptions::default())
                .is_none()
        );
    }
}
