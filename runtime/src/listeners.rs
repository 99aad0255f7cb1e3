//! Synchronous state listeners.
//!
//! Listeners run on the dispatching thread after the dispatch lock is released, so
//! they may dispatch again. A panicking listener is logged and skipped.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use storex_core::logger::Logger;
use storex_core::state::StateTree;
use storex_core::sync::{lock, panic_message};

type Listener = Arc<dyn Fn(&StateTree) + Send + Sync>;

/// Registered state listeners, notified in subscription order.
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<u64, Listener>>,
    logger: Logger,
}

impl ListenerRegistry {
    pub(crate) fn new(logger: Logger) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(BTreeMap::new()),
            logger,
        }
    }

    pub(crate) fn add(self: &Arc<Self>, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).insert(id, listener);
        Subscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) -> bool {
        lock(&self.listeners).remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub(crate) fn clear(&self) {
        lock(&self.listeners).clear();
    }

    pub(crate) fn notify(&self, state: &StateTree) {
        let snapshot: Vec<(u64, Listener)> = lock(&self.listeners)
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();
        for (id, listener) in snapshot {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (*listener)(state))) {
                self.logger.error(format_args!(
                    "state listener #{id} panicked: {}",
                    panic_message(&*payload)
                ));
            }
        }
    }
}

/// Handle for a state listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    /// Stop receiving notifications.
    ///
    /// Returns whether the listener was still registered.
    pub fn unsubscribe(self) -> bool {
        self.detach_from_registry()
    }

    /// Whether the listener is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| lock(&registry.listeners).contains_key(&self.id))
    }

    fn detach_from_registry(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(self.id))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach_from_registry();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use storex_core::logger::LogLevel;

    fn registry() -> Arc<ListenerRegistry> {
        Arc::new(ListenerRegistry::new(Logger::new("test", LogLevel::Error)))
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let subscription = registry.add(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        registry.notify(&StateTree::empty());
        assert!(subscription.is_active());
        drop(subscription);
        registry.notify(&StateTree::empty());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _bad = registry.add(Arc::new(|_| panic!("listener bug")));
        let _good = registry.add(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        registry.notify(&StateTree::empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_reports_state() {
        let registry = registry();
        let subscription = registry.add(Arc::new(|_| {}));
        registry.clear();
        assert!(!subscription.unsubscribe());
    }
}
