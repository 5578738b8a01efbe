//! Mutable property committing a diff with every value.

use std::sync::Arc;

use arc_swap::ArcSwap;

use super::DiffProperty;
use crate::notify::{no_hook, ChangeListener, ConcurrentNotifier, Listener, ListenerId};
use crate::property::{Property, Value};

/// Lock-free mutable property whose writers supply the diff.
///
/// Like [`ConcurrentMutable`](crate::property::ConcurrentMutable), every
/// commit goes through a chained notifier, so the `(old, new, diff)` triples
/// listeners see form one unbroken chain.
pub struct ConcurrentMutableDiff<T: Value, D> {
    value: ArcSwap<T>,
    notifier: ConcurrentNotifier<T, D>,
}

impl<T, D> ConcurrentMutableDiff<T, D>
where
    T: Value + PartialEq,
    D: Send + Sync + 'static,
{
    pub fn new(value: T) -> Arc<Self> {
        let value = Arc::new(value);
        Arc::new(Self {
            value: ArcSwap::new(Arc::clone(&value)),
            notifier: ConcurrentNotifier::chained(value),
        })
    }

    pub fn set(&self, value: T, diff: D) {
        let new = Arc::new(value);
        let old = self.value.swap(Arc::clone(&new));
        self.notifier.publish(old, new, diff);
    }

    /// Commit `new` with `diff` only if the current value equals `expected`.
    pub fn compare_and_set(&self, expected: &T, new: T, diff: D) -> bool {
        let current = self.value.load_full();
        if *current != *expected {
            return false;
        }
        let new = Arc::new(new);
        let prev = self.value.compare_and_swap(&current, Arc::clone(&new));
        if !Arc::ptr_eq(&*prev, &current) {
            return false;
        }
        self.notifier.publish(current, new, diff);
        true
    }

    /// Replace the value and diff with `f(value)`, retrying on lost races.
    pub fn update<F>(&self, f: F)
    where
        F: Fn(&T) -> (T, D),
    {
        loop {
            let current = self.value.load_full();
            let (next, diff) = f(&current);
            let next = Arc::new(next);
            let prev = self.value.compare_and_swap(&current, Arc::clone(&next));
            if Arc::ptr_eq(&*prev, &current) {
                self.notifier.publish(current, next, diff);
                return;
            }
        }
    }
}

impl<T, D> Property<T> for ConcurrentMutableDiff<T, D>
where
    T: Value + PartialEq,
    D: Send + Sync + 'static,
{
    fn value(&self) -> T {
        (**self.value.load()).clone()
    }

    fn may_change(&self) -> bool {
        true
    }

    fn is_concurrent(&self) -> bool {
        true
    }

    fn subscribe_unconfined(&self, listener: ChangeListener<T>) -> ListenerId {
        self.subscribe_diff_unconfined(listener.ignoring_diff())
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.notifier.unsubscribe(id, &no_hook);
    }
}

impl<T, D> DiffProperty<T, D> for ConcurrentMutableDiff<T, D>
where
    T: Value + PartialEq,
    D: Send + Sync + 'static,
{
    fn subscribe_diff_unconfined(&self, listener: Listener<T, D>) -> ListenerId {
        let id = listener.id();
        self.notifier.subscribe(listener, &no_hook);
        id
    }
}
