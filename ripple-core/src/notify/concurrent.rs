//! Lock-Free Notifier
//!
//! All bookkeeping lives in one [`ListenersState`] snapshot behind an
//! `ArcSwap`. Every mutation clones the snapshot, edits the clone and
//! publishes it with a compare-and-swap; readers never see a half-updated
//! state.
//!
//! # How Delivery Works
//!
//! 1. `publish(old, new)` appends `new` to `pending`. The thread whose CAS
//!    turned `pending` from empty to non-empty owns the pass; everyone else
//!    returns and lets the owner pick their value up.
//!
//! 2. Before appending, the tail of the queue (the most recently enqueued
//!    value) must be `old` itself. If it is not, a racing writer committed
//!    earlier but has not enqueued yet, so we yield until it has. This keeps
//!    the `(old, new)` chain unbroken.
//!
//! 3. The owner delivers `pending[0]` to every listener, re-reading the
//!    listener array on each step, then pops the head and splices in
//!    listeners that subscribed behind it. When the queue drains, tombstones
//!    are compacted and ownership is released.
//!
//! # Observed State
//!
//! Adding the first listener or removing the last one starts a transition.
//! Only one thread runs the hook at a time; a transition requested while one
//! is running just flips the target and the running thread loops until the
//! applied state matches it.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use arc_swap::ArcSwap;
use tracing::{debug, trace};

use super::listener::{Listener, ListenerId, PassPanic};
use super::state::{ListenersState, Update};

/// Outcome of one step of [`ConcurrentNotifier::transact`].
enum Step<T, D, R> {
    /// Leave the state alone and return.
    Done(R),
    /// Someone else must make progress first.
    Spin,
    /// Try to install this state; return on success, retry on a lost race.
    Swap(ListenersState<T, D>, R),
}

pub struct ConcurrentNotifier<T, D = ()> {
    state: ArcSwap<ListenersState<T, D>>,
}

impl<T, D> ConcurrentNotifier<T, D>
where
    T: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(ListenersState::new(None)),
        }
    }

    /// A notifier whose queue tail persists between passes.
    ///
    /// Used by properties that commit every value through `publish`, so even
    /// two writers racing while nobody listens are enqueued in commit order.
    pub fn chained(initial: Arc<T>) -> Self {
        Self {
            state: ArcSwap::from_pointee(ListenersState::new(Some(initial))),
        }
    }

    fn transact<R>(&self, mut step: impl FnMut(&ListenersState<T, D>) -> Step<T, D, R>) -> R {
        loop {
            let current = self.state.load_full();
            match step(&current) {
                Step::Done(result) => return result,
                Step::Spin => thread::yield_now(),
                Step::Swap(next, result) => {
                    let prev = self.state.compare_and_swap(&current, Arc::new(next));
                    if Arc::ptr_eq(&*prev, &current) {
                        return result;
                    }
                }
            }
        }
    }

    pub fn is_observed(&self) -> bool {
        self.state.load().has_listeners()
    }

    /// Observed state as last requested by a transition.
    ///
    /// Stable while the caller holds the transition lock.
    pub fn observed_state(&self) -> bool {
        self.state.load().transition.next_observed
    }

    pub fn subscribe(&self, listener: Listener<T, D>, hook: &dyn Fn(bool)) {
        let was_observed = self.transact(|state| {
            let mut next = state.clone();
            next.add_listener(listener.clone());
            Step::Swap(next, state.has_listeners())
        });
        if !was_observed {
            self.change_observed_state(true, hook);
        }
    }

    /// Remove the first registration with `id`. Absent ids are ignored.
    pub fn unsubscribe(&self, id: ListenerId, hook: &dyn Fn(bool)) {
        let removed = self.transact(|state| {
            let mut next = state.clone();
            match next.remove_listener(id) {
                Some(listener) => {
                    let still_observed = next.has_listeners();
                    Step::Swap(next, Some((listener, still_observed)))
                }
                None => Step::Done(None),
            }
        });
        if let Some((listener, still_observed)) = removed {
            listener.cancel();
            if !still_observed {
                self.change_observed_state(false, hook);
            }
        }
    }

    /// Deliver `old -> new` to every listener, in order with all other publications.
    pub fn publish(&self, old: Arc<T>, new: Arc<T>, diff: D) {
        let me = thread::current().id();
        let update = Update {
            value: new,
            diff: Arc::new(diff),
        };
        let owns = self.transact(|state| {
            if let Some(tail) = &state.last {
                let reentrant = !state.chained && state.delivering_on == Some(me);
                if !Arc::ptr_eq(tail, &old) && !reentrant {
                    return Step::Spin;
                }
            }
            if !state.is_delivering() && !state.has_listeners() {
                if !state.chained {
                    return Step::Done(false);
                }
                let mut next = state.clone();
                next.last = Some(Arc::clone(&update.value));
                return Step::Swap(next, false);
            }
            let mut next = state.clone();
            let starts = next.enqueue(update.clone(), me);
            Step::Swap(next, starts)
        });
        if owns {
            self.deliver(old);
        }
    }

    /// Publish `new` as the successor of whatever was enqueued last.
    ///
    /// Only meaningful for chained notifiers, where the tail is always known.
    /// Returns the value that `new` replaced in the chain.
    pub fn publish_next(&self, new: Arc<T>, diff: D) -> Option<Arc<T>> {
        let me = thread::current().id();
        let update = Update {
            value: new,
            diff: Arc::new(diff),
        };
        let (old, owns) = self.transact(|state| {
            let old = state.last.clone();
            let mut next = state.clone();
            if !state.is_delivering() && !state.has_listeners() || old.is_none() {
                next.last = Some(Arc::clone(&update.value));
                return Step::Swap(next, (old, false));
            }
            let starts = next.enqueue(update.clone(), me);
            Step::Swap(next, (old, starts))
        });
        if owns {
            if let Some(old) = &old {
                self.deliver(Arc::clone(old));
            }
        }
        old
    }

    /// Make `value` the tail of a chained notifier without delivering it.
    ///
    /// For values no listener has been told about, such as a bound upstream's
    /// current value picked up when observation starts. Ignored mid-pass.
    pub fn rebase(&self, value: Arc<T>) {
        self.transact(|state| {
            if state.is_delivering() || !state.chained {
                return Step::Done(());
            }
            let mut next = state.clone();
            next.last = Some(Arc::clone(&value));
            Step::Swap(next, ())
        });
    }

    /// Run the pass this thread owns until the queue drains.
    ///
    /// A panicking listener does not end the pass; the first panic is
    /// re-raised here once ownership has been released.
    fn deliver(&self, mut prev: Arc<T>) {
        trace!("took notification ownership");
        let mut delivered = 0usize;
        let mut panicked = PassPanic::default();
        loop {
            let head = self.state.load().head().cloned();
            if let Some(update) = head {
                self.notify_all(&mut panicked, &prev, &update.value, &update.diff);
                prev = update.value;
                delivered += 1;
            }

            let done = self.transact(|state| {
                let mut next = state.clone();
                let done = next.advance();
                Step::Swap(next, done)
            });
            if done {
                break;
            }
        }
        trace!(delivered, "notification pass complete");
        panicked.resume();
    }

    fn notify_all(&self, panicked: &mut PassPanic, old: &Arc<T>, new: &Arc<T>, diff: &Arc<D>) {
        let mut index = 0;
        loop {
            // Fresh snapshot on every step: slots may be tombstoned under us.
            let listener = match self.state.load().listener_at(index) {
                None => break,
                Some(slot) => slot.cloned(),
            };
            if let Some(listener) = listener {
                panicked.notify(&listener, old, new, diff);
            }
            index += 1;
        }
    }

    fn change_observed_state(&self, observed: bool, hook: &dyn Fn(bool)) {
        let me = thread::current().id();
        let already_running = self.transact(|state| {
            let transition = state.transition;
            if transition.next_observed == observed {
                return Step::Done(None);
            }
            if transition.locked_by.is_some_and(|holder| holder != me) {
                return Step::Spin;
            }
            let mut next = state.clone();
            next.transition.next_observed = observed;
            if transition.running_on.is_none() {
                next.transition.running_on = Some(me);
            }
            Step::Swap(next, Some(transition.running_on.is_some()))
        });
        if already_running != Some(false) {
            return;
        }

        let mut applying = observed;
        loop {
            debug!(observed = applying, "observed state transition");
            hook(applying);

            let pending = self.transact(|state| {
                if state.transition.next_observed == applying {
                    let mut next = state.clone();
                    next.transition.running_on = None;
                    Step::Swap(next, None)
                } else {
                    Step::Done(Some(state.transition.next_observed))
                }
            });
            match pending {
                Some(target) => applying = target,
                None => return,
            }
        }
    }

    /// Run `f` while no observed-state transition can start or run on another thread.
    ///
    /// Re-entrant for the holding thread.
    pub fn with_locked_transition<R>(&self, f: impl FnOnce() -> R) -> R {
        let me = thread::current().id();
        let reentrant = self.transact(|state| {
            let transition = state.transition;
            if transition.locked_by == Some(me) {
                return Step::Done(true);
            }
            let busy = transition.locked_by.is_some()
                || transition.running_on.is_some_and(|runner| runner != me);
            if busy {
                return Step::Spin;
            }
            let mut next = state.clone();
            next.transition.locked_by = Some(me);
            Step::Swap(next, false)
        });
        if reentrant {
            return f();
        }
        let _unlock = TransitionLock { notifier: self };
        f()
    }

    fn unlock_transition(&self) {
        self.transact(|state| {
            let mut next = state.clone();
            next.transition.locked_by = None;
            Step::Swap(next, ())
        });
    }

    pub(crate) fn delivering_on(&self) -> Option<ThreadId> {
        self.state.load().delivering_on
    }
}

impl<T, D> Default for ConcurrentNotifier<T, D>
where
    T: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the transition lock on drop, also on unwind.
struct TransitionLock<'a, T, D>
where
    T: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    notifier: &'a ConcurrentNotifier<T, D>,
}

impl<T, D> Drop for TransitionLock<'_, T, D>
where
    T: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.notifier.unlock_transition();
    }
}
