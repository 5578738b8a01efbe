//! Mutable properties.
//!
//! Both flavours hold a value or a binding to an upstream property. While
//! bound, `value()` reads through to the upstream and changes are mirrored
//! as long as somebody listens to us.

use std::cell::RefCell;
use std::mem;
use std::sync::{Arc, Weak};
use std::thread;

use arc_swap::ArcSwap;
use tracing::debug;

use super::{MutableProperty, Prop, Property, Value};
use crate::context::{Confined, Confinement, OwnerToken};
use crate::derived::Route;
use crate::error::Result;
use crate::notify::{ChangeListener, ConcurrentNotifier, ConfinedNotifier, ListenerId};

/// What a concurrent mutable property currently holds.
enum Slot<T: Value> {
    Value(Arc<T>),
    Bound(Prop<T>),
    /// A thread is swapping the binding; everyone else waits it out.
    Rebinding,
}

/// Whether two handles point at the same property.
pub(crate) fn same_property<T: Value>(a: &Prop<T>, b: &Prop<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Lock-free mutable property.
///
/// Every committed value goes through a chained notifier, so racing writers
/// produce one unbroken `(old, new)` chain even while nobody listens.
pub struct ConcurrentMutable<T: Value> {
    slot: ArcSwap<Slot<T>>,
    notifier: ConcurrentNotifier<T>,
    /// Subscribed to the upstream while bound and observed.
    mirror: ChangeListener<T>,
}

impl<T: Value + PartialEq> ConcurrentMutable<T> {
    pub fn new(value: T) -> Arc<Self> {
        let value = Arc::new(value);
        Arc::new_cyclic(|me: &Weak<Self>| {
            let me = me.clone();
            Self {
                slot: ArcSwap::from_pointee(Slot::Value(Arc::clone(&value))),
                notifier: ConcurrentNotifier::chained(value),
                mirror: ChangeListener::on_arcs(move |_old, new| {
                    if let Some(this) = me.upgrade() {
                        this.upstream_changed(new);
                    }
                }),
            }
        })
    }

    fn upstream_changed(&self, new: &Arc<T>) {
        loop {
            match &**self.slot.load() {
                Slot::Bound(_) => break,
                // Binding dropped; a late delivery from the old upstream.
                Slot::Value(_) => return,
                Slot::Rebinding => thread::yield_now(),
            }
        }
        self.notifier.publish_next(Arc::clone(new), ());
    }

    fn observed_state_changed(&self, observed: bool) {
        if let Slot::Bound(upstream) = &*self.slot.load_full() {
            if observed {
                // Nobody was told about upstream changes while unobserved.
                self.notifier.rebase(Arc::new(upstream.value()));
                upstream.subscribe_unconfined(self.mirror.clone());
            } else {
                upstream.unsubscribe(self.mirror.id());
            }
        }
    }

    /// Take the slot over, leaving `Rebinding` behind for racing threads to spin on.
    fn begin_rebinding(&self) -> Arc<Slot<T>> {
        loop {
            let current = self.slot.load_full();
            if matches!(*current, Slot::Rebinding) {
                thread::yield_now();
                continue;
            }
            let prev = self
                .slot
                .compare_and_swap(&current, Arc::new(Slot::Rebinding));
            if Arc::ptr_eq(&*prev, &current) {
                return current;
            }
        }
    }

    /// Replace whatever the slot holds with `next`, moving the upstream
    /// subscription along if we are observed.
    fn replace_binding(&self, next: Slot<T>) {
        self.notifier.with_locked_transition(|| {
            let previous = self.begin_rebinding();
            let old_upstream = match &*previous {
                Slot::Bound(upstream) => Some(upstream),
                _ => None,
            };
            let new_upstream = match &next {
                Slot::Bound(upstream) => Some(upstream),
                _ => None,
            };

            let retarget = match (old_upstream, new_upstream) {
                (Some(a), Some(b)) => !same_property(a, b),
                (None, None) => false,
                _ => true,
            };
            if retarget && self.notifier.observed_state() {
                debug!(bound = new_upstream.is_some(), "rebinding mutable property");
                if let Some(upstream) = old_upstream {
                    upstream.unsubscribe(self.mirror.id());
                }
                if let Some(upstream) = new_upstream {
                    upstream.subscribe_unconfined(self.mirror.clone());
                }
            }

            let new_value = match &next {
                Slot::Value(value) => Arc::clone(value),
                Slot::Bound(upstream) => Arc::new(upstream.value()),
                Slot::Rebinding => unreachable!("rebinding is never a target"),
            };
            self.slot.store(Arc::new(next));

            // Published under the lock: the next rebinder must see our value enqueued.
            match &*previous {
                Slot::Value(old) => self.notifier.publish(Arc::clone(old), new_value, ()),
                _ => {
                    self.notifier.publish_next(new_value, ());
                }
            }
        });
    }
}

impl<T: Value + PartialEq> Property<T> for ConcurrentMutable<T> {
    fn value(&self) -> T {
        loop {
            let slot = self.slot.load_full();
            match &*slot {
                Slot::Value(value) => return (**value).clone(),
                Slot::Bound(upstream) => return upstream.value(),
                Slot::Rebinding => thread::yield_now(),
            }
        }
    }

    fn may_change(&self) -> bool {
        true
    }

    fn is_concurrent(&self) -> bool {
        true
    }

    fn subscribe_unconfined(&self, listener: ChangeListener<T>) -> ListenerId {
        let id = listener.id();
        self.notifier
            .subscribe(listener, &|observed| self.observed_state_changed(observed));
        id
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.notifier
            .unsubscribe(id, &|observed| self.observed_state_changed(observed));
    }
}

impl<T: Value + PartialEq> MutableProperty<T> for ConcurrentMutable<T> {
    fn set(&self, value: T) {
        let new = Arc::new(value);
        loop {
            let current = self.slot.load_full();
            match &*current {
                Slot::Value(old) => {
                    let prev = self
                        .slot
                        .compare_and_swap(&current, Arc::new(Slot::Value(Arc::clone(&new))));
                    if Arc::ptr_eq(&*prev, &current) {
                        self.notifier.publish(Arc::clone(old), new, ());
                        return;
                    }
                }
                Slot::Bound(_) => {
                    self.replace_binding(Slot::Value(new));
                    return;
                }
                Slot::Rebinding => thread::yield_now(),
            }
        }
    }

    fn compare_and_set(&self, expected: &T, new: T) -> bool {
        loop {
            let current = self.slot.load_full();
            match &*current {
                Slot::Value(old) => {
                    if **old != *expected {
                        return false;
                    }
                    let new = Arc::new(new);
                    let prev = self
                        .slot
                        .compare_and_swap(&current, Arc::new(Slot::Value(Arc::clone(&new))));
                    if !Arc::ptr_eq(&*prev, &current) {
                        return false;
                    }
                    self.notifier.publish(Arc::clone(old), new, ());
                    return true;
                }
                Slot::Bound(upstream) => {
                    return self.notifier.with_locked_transition(|| {
                        let prev = self
                            .slot
                            .compare_and_swap(&current, Arc::new(Slot::Rebinding));
                        if !Arc::ptr_eq(&*prev, &current) {
                            return false;
                        }
                        if upstream.value() != *expected {
                            self.slot.store(Arc::clone(&current));
                            return false;
                        }
                        if self.notifier.observed_state() {
                            upstream.unsubscribe(self.mirror.id());
                        }
                        let new = Arc::new(new);
                        self.slot.store(Arc::new(Slot::Value(Arc::clone(&new))));
                        self.notifier.publish_next(new, ());
                        true
                    });
                }
                Slot::Rebinding => thread::yield_now(),
            }
        }
    }

    fn bind_to(&self, upstream: Prop<T>) -> Result<()> {
        if upstream.may_change() {
            self.replace_binding(Slot::Bound(upstream));
        } else {
            self.set(upstream.value());
        }
        Ok(())
    }

    fn as_property(self: Arc<Self>) -> Prop<T> {
        self
    }
}

struct Binding<T: Value> {
    upstream: Prop<T>,
    route: Route,
}

struct ConfinedState<T: Value> {
    value: Arc<T>,
    binding: Option<Binding<T>>,
}

/// Mutable property owned by the thread that created it.
///
/// A concurrent upstream set from other threads reaches us through the
/// executor registered for the owner thread at `bind_to` time. Binding to a
/// concurrent upstream on a thread without an executor is refused.
pub struct ConfinedMutable<T: Value> {
    state: Confined<RefCell<ConfinedState<T>>>,
    notifier: ConfinedNotifier<T>,
    mirror: ChangeListener<T>,
}

impl<T: Value + PartialEq> ConfinedMutable<T> {
    pub fn new(value: T) -> Arc<Self> {
        let owner = OwnerToken::current();
        Arc::new_cyclic(|me: &Weak<Self>| {
            let me = me.clone();
            Self {
                state: Confined::new(
                    owner.clone(),
                    RefCell::new(ConfinedState {
                        value: Arc::new(value),
                        binding: None,
                    }),
                ),
                notifier: ConfinedNotifier::new(owner),
                mirror: ChangeListener::on_arcs(move |_old, new| {
                    if let Some(this) = me.upgrade() {
                        this.upstream_changed(new);
                    }
                }),
            }
        })
    }

    fn cell(&self) -> &RefCell<ConfinedState<T>> {
        self.state.get()
    }

    fn upstream_changed(&self, new: &Arc<T>) {
        let old = {
            let mut state = self.cell().borrow_mut();
            if state.binding.is_none() {
                return;
            }
            mem::replace(&mut state.value, Arc::clone(new))
        };
        self.notifier.publish(old, Arc::clone(new), ());
    }

    fn observed_state_changed(&self, observed: bool) {
        let binding = self
            .cell()
            .borrow()
            .binding
            .as_ref()
            .map(|b| (Arc::clone(&b.upstream), b.route.clone()));
        if let Some((upstream, route)) = binding {
            if observed {
                self.cell().borrow_mut().value = Arc::new(upstream.value());
                route.attach(&upstream, self.mirror.clone());
            } else {
                upstream.unsubscribe(self.mirror.id());
            }
        }
    }

    fn drop_binding(&self) {
        let dropped = self.cell().borrow_mut().binding.take();
        if let Some(binding) = dropped {
            if self.notifier.observed_state() {
                binding.upstream.unsubscribe(self.mirror.id());
            }
        }
    }

    fn commit(&self, new: Arc<T>) {
        let old = mem::replace(&mut self.cell().borrow_mut().value, Arc::clone(&new));
        self.notifier.publish(old, new, ());
    }

    /// Typed variant of `set` for callers that want to handle wrong-thread access.
    pub fn try_set(&self, value: T) -> Result<()> {
        self.state.owner().check()?;
        self.set(value);
        Ok(())
    }
}

impl<T: Value + PartialEq> Property<T> for ConfinedMutable<T> {
    fn value(&self) -> T {
        let upstream = {
            let state = self.cell().borrow();
            match &state.binding {
                Some(binding) => Arc::clone(&binding.upstream),
                None => return (*state.value).clone(),
            }
        };
        upstream.value()
    }

    fn may_change(&self) -> bool {
        true
    }

    fn is_concurrent(&self) -> bool {
        false
    }

    fn check_thread(&self) -> Result<()> {
        self.state.owner().check()
    }

    fn subscribe_unconfined(&self, listener: ChangeListener<T>) -> ListenerId {
        let id = listener.id();
        self.notifier
            .subscribe(listener, &|observed| self.observed_state_changed(observed));
        id
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.notifier
            .unsubscribe(id, &|observed| self.observed_state_changed(observed));
    }
}

impl<T: Value + PartialEq> MutableProperty<T> for ConfinedMutable<T> {
    fn set(&self, value: T) {
        self.drop_binding();
        self.commit(Arc::new(value));
    }

    fn compare_and_set(&self, expected: &T, new: T) -> bool {
        if self.value() != *expected {
            return false;
        }
        self.set(new);
        true
    }

    fn bind_to(&self, upstream: Prop<T>) -> Result<()> {
        if !upstream.may_change() {
            self.set(upstream.value());
            return Ok(());
        }
        let route = Route::resolve(
            &Confinement::Confined(self.state.owner().clone()),
            upstream.is_concurrent(),
        )?;
        let previous = self.cell().borrow_mut().binding.replace(Binding {
            upstream: Arc::clone(&upstream),
            route: route.clone(),
        });
        if self.notifier.observed_state() {
            let same = previous
                .as_ref()
                .is_some_and(|b| same_property(&b.upstream, &upstream));
            if !same {
                debug!("rebinding confined property");
                if let Some(previous) = previous {
                    previous.upstream.unsubscribe(self.mirror.id());
                }
                route.attach(&upstream, self.mirror.clone());
            }
        }
        self.commit(Arc::new(upstream.value()));
        Ok(())
    }

    fn as_property(self: Arc<Self>) -> Prop<T> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PropertyError;
    use crate::executor::{EventLoop, ExecutorScope};
    use crate::property::{concurrent_property_of, immutable_property_of};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Mutex;

    fn record<T: Value>(prop: &dyn Property<T>) -> (Arc<Mutex<Vec<(T, T)>>>, ListenerId) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let id = prop.subscribe_unconfined(ChangeListener::new(move |old: &T, new: &T| {
            log_clone.lock().unwrap().push((old.clone(), new.clone()));
        }));
        (log, id)
    }

    #[test]
    fn set_notifies_even_with_equal_value() {
        let prop = ConcurrentMutable::new(1);
        let (log, _) = record(&*prop);
        prop.set(2);
        prop.set(2);
        assert_eq!(*log.lock().unwrap(), vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn compare_and_set_uses_equality() {
        let prop = ConcurrentMutable::new("a".to_string());
        assert!(!prop.compare_and_set(&"b".to_string(), "c".to_string()));
        assert!(prop.compare_and_set(&"a".to_string(), "c".to_string()));
        assert_eq!(prop.value(), "c");
    }

    #[test]
    fn bound_property_mirrors_upstream_while_observed() {
        let upstream = concurrent_property_of(10);
        let prop = ConcurrentMutable::new(0);
        prop.bind_to(upstream.clone().as_property()).unwrap();
        assert_eq!(prop.value(), 10);

        upstream.set(11);
        assert_eq!(prop.value(), 11);

        let (log, id) = record(&*prop);
        upstream.set(12);
        prop.unsubscribe(id);
        upstream.set(13);
        assert_eq!(*log.lock().unwrap(), vec![(11, 12)]);
        assert_eq!(prop.value(), 13);
    }

    #[test]
    fn set_drops_binding() {
        let upstream = concurrent_property_of(1);
        let prop = ConcurrentMutable::new(0);
        let (log, _) = record(&*prop);

        prop.bind_to(upstream.clone().as_property()).unwrap();
        prop.set(5);
        upstream.set(2);

        assert_eq!(prop.value(), 5);
        assert_eq!(*log.lock().unwrap(), vec![(0, 1), (1, 5)]);
    }

    #[test]
    fn binding_to_immutable_is_a_set() {
        let prop = ConcurrentMutable::new(0);
        prop.bind_to(immutable_property_of(7)).unwrap();
        assert_eq!(prop.value(), 7);
        prop.set(8);
        assert_eq!(prop.value(), 8);
    }

    #[test]
    fn compare_and_set_while_bound_checks_upstream_value() {
        let upstream = concurrent_property_of(3);
        let prop = ConcurrentMutable::new(0);
        prop.bind_to(upstream.clone().as_property()).unwrap();

        assert!(!prop.compare_and_set(&0, 9));
        assert!(prop.compare_and_set(&3, 9));
        upstream.set(4);
        assert_eq!(prop.value(), 9);
    }

    #[test]
    fn rebinding_moves_the_upstream_subscription() {
        let first = concurrent_property_of(1);
        let second = concurrent_property_of(2);
        let prop = ConcurrentMutable::new(0);
        let (log, _) = record(&*prop);

        prop.bind_to(first.clone().as_property()).unwrap();
        prop.bind_to(second.clone().as_property()).unwrap();
        first.set(100);
        second.set(3);

        assert_eq!(*log.lock().unwrap(), vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn confined_mutable_mirrors_and_unbinds() {
        let upstream = ConfinedMutable::new(1);
        let prop = ConfinedMutable::new(0);
        let (log, _) = record(&*prop);

        prop.bind_to(upstream.clone().as_property()).unwrap();
        upstream.set(2);
        prop.set(9);
        upstream.set(3);

        assert_eq!(*log.lock().unwrap(), vec![(0, 1), (1, 2), (2, 9)]);
        assert_eq!(prop.value(), 9);
    }

    #[test]
    fn confined_mutable_receives_concurrent_upstream_through_owner_executor() {
        let event_loop = Arc::new(EventLoop::new());
        let _scope = ExecutorScope::enter(event_loop.clone());

        let upstream = concurrent_property_of(0);
        let prop = ConfinedMutable::new(0);
        prop.bind_to(upstream.clone().as_property()).unwrap();

        let seen = Arc::new(AtomicI32::new(0));
        let seen_clone = seen.clone();
        prop.subscribe(ChangeListener::new(move |_: &i32, new: &i32| {
            seen_clone.store(*new, Ordering::SeqCst);
        }));

        let remote = upstream.clone();
        thread::spawn(move || remote.set(42)).join().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        event_loop.run_pending();
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn confined_mutable_refuses_concurrent_upstream_without_executor() {
        let upstream = concurrent_property_of(5);
        let prop = ConfinedMutable::new(0);

        let result = prop.bind_to(upstream.clone().as_property());
        assert!(matches!(result, Err(PropertyError::NoExecutor { .. })));
        assert_eq!(prop.value(), 0);

        upstream.set(6);
        assert_eq!(prop.value(), 0);
        prop.bind_to(immutable_property_of(7)).unwrap();
        assert_eq!(prop.value(), 7);
    }

    #[test]
    fn confined_try_set_reports_wrong_thread() {
        let prop = ConfinedMutable::new(0);
        let remote = prop.clone();
        let result = thread::spawn(move || remote.try_set(1).is_err())
            .join()
            .unwrap();
        assert!(result);
    }
}
