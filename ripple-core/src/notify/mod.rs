//! Notification Core
//!
//! Every property owns a notifier: listener bookkeeping plus the delivery
//! algorithm that turns `publish(old, new)` calls into ordered,
//! non-overlapping listener invocations.
//!
//! # Guarantees
//!
//! - A listener is never invoked concurrently with itself for one property.
//! - All listeners of a property see the same order of `(old, new)` pairs.
//! - A publish issued from inside a listener is queued behind the current
//!   update instead of being delivered recursively.
//! - A listener subscribed during a pass sees only updates enqueued after it.
//! - A listener removed during a pass is not invoked again, while listeners
//!   that stay subscribed miss nothing.
//!
//! # Variants
//!
//! - [`ConcurrentNotifier`]: lock-free, any thread, state swapped by CAS.
//! - [`ConfinedNotifier`]: one owner thread, no atomics on the hot path.
//!
//! Both report observed-state transitions (zero listeners vs. at least one)
//! through a hook supplied by the owning property on each call.

mod concurrent;
mod confined;
mod listener;
mod state;

pub use concurrent::ConcurrentNotifier;
pub use confined::ConfinedNotifier;
pub use listener::{ChangeListener, Listener, ListenerId};
pub use state::Update;

use std::sync::Arc;

use crate::context::Confinement;

/// The shared contract of both notifier variants.
pub trait NotificationCore<T, D>: Send + Sync {
    fn subscribe(&self, listener: Listener<T, D>, hook: &dyn Fn(bool));

    fn unsubscribe(&self, id: ListenerId, hook: &dyn Fn(bool));

    /// Entry point for a property that just committed `new` in place of `old`.
    fn publish(&self, old: Arc<T>, new: Arc<T>, diff: D);

    fn is_observed(&self) -> bool;

    /// Whether the observed-state hook last ran (or is running) with `true`.
    fn observed_state(&self) -> bool;

    fn is_concurrent(&self) -> bool;

    /// Run `f` with observed-state transitions held off.
    fn with_locked_transition<R>(&self, f: impl FnOnce() -> R) -> R
    where
        Self: Sized;
}

impl<T, D> NotificationCore<T, D> for ConcurrentNotifier<T, D>
where
    T: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    fn subscribe(&self, listener: Listener<T, D>, hook: &dyn Fn(bool)) {
        ConcurrentNotifier::subscribe(self, listener, hook);
    }

    fn unsubscribe(&self, id: ListenerId, hook: &dyn Fn(bool)) {
        ConcurrentNotifier::unsubscribe(self, id, hook);
    }

    fn publish(&self, old: Arc<T>, new: Arc<T>, diff: D) {
        ConcurrentNotifier::publish(self, old, new, diff);
    }

    fn is_observed(&self) -> bool {
        ConcurrentNotifier::is_observed(self)
    }

    fn observed_state(&self) -> bool {
        ConcurrentNotifier::observed_state(self)
    }

    fn is_concurrent(&self) -> bool {
        true
    }

    fn with_locked_transition<R>(&self, f: impl FnOnce() -> R) -> R {
        ConcurrentNotifier::with_locked_transition(self, f)
    }
}

impl<T, D> NotificationCore<T, D> for ConfinedNotifier<T, D>
where
    T: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    fn subscribe(&self, listener: Listener<T, D>, hook: &dyn Fn(bool)) {
        ConfinedNotifier::subscribe(self, listener, hook);
    }

    fn unsubscribe(&self, id: ListenerId, hook: &dyn Fn(bool)) {
        ConfinedNotifier::unsubscribe(self, id, hook);
    }

    fn publish(&self, old: Arc<T>, new: Arc<T>, diff: D) {
        ConfinedNotifier::publish(self, old, new, diff);
    }

    fn is_observed(&self) -> bool {
        ConfinedNotifier::is_observed(self)
    }

    fn observed_state(&self) -> bool {
        ConfinedNotifier::observed_state(self)
    }

    fn is_concurrent(&self) -> bool {
        false
    }

    fn with_locked_transition<R>(&self, f: impl FnOnce() -> R) -> R {
        self.owner().enforce();
        f()
    }
}

/// Notifier whose variant is picked at construction from a [`Confinement`].
pub enum Notifier<T, D = ()> {
    Concurrent(ConcurrentNotifier<T, D>),
    Confined(ConfinedNotifier<T, D>),
}

impl<T, D> Notifier<T, D>
where
    T: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    pub fn new(confinement: &Confinement) -> Self {
        match confinement.owner() {
            None => Self::Concurrent(ConcurrentNotifier::new()),
            Some(owner) => Self::Confined(ConfinedNotifier::new(owner.clone())),
        }
    }
}

impl<T, D> NotificationCore<T, D> for Notifier<T, D>
where
    T: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    fn subscribe(&self, listener: Listener<T, D>, hook: &dyn Fn(bool)) {
        match self {
            Self::Concurrent(n) => n.subscribe(listener, hook),
            Self::Confined(n) => n.subscribe(listener, hook),
        }
    }

    fn unsubscribe(&self, id: ListenerId, hook: &dyn Fn(bool)) {
        match self {
            Self::Concurrent(n) => n.unsubscribe(id, hook),
            Self::Confined(n) => n.unsubscribe(id, hook),
        }
    }

    fn publish(&self, old: Arc<T>, new: Arc<T>, diff: D) {
        match self {
            Self::Concurrent(n) => n.publish(old, new, diff),
            Self::Confined(n) => n.publish(old, new, diff),
        }
    }

    fn is_observed(&self) -> bool {
        match self {
            Self::Concurrent(n) => n.is_observed(),
            Self::Confined(n) => n.is_observed(),
        }
    }

    fn observed_state(&self) -> bool {
        match self {
            Self::Concurrent(n) => n.observed_state(),
            Self::Confined(n) => n.observed_state(),
        }
    }

    fn is_concurrent(&self) -> bool {
        matches!(self, Self::Concurrent(_))
    }

    fn with_locked_transition<R>(&self, f: impl FnOnce() -> R) -> R {
        match self {
            Self::Concurrent(n) => n.with_locked_transition(f),
            Self::Confined(n) => NotificationCore::with_locked_transition(n, f),
        }
    }
}

/// Hook for properties with no observed-state behavior.
pub(crate) fn no_hook(_: bool) {}
