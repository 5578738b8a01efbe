//! Single-thread notifier.
//!
//! Same bookkeeping as the lock-free variant, minus the atomics: the state
//! sits in a `RefCell` owned by one thread and is edited in place. The only
//! hazard is re-entrancy, a listener publishing or (un)subscribing while a
//! pass iterates, which the pending queue and tombstones already handle.
//! Borrows of the state never span a listener call.

use std::cell::RefCell;
use std::sync::Arc;
use std::thread;

use tracing::{debug, trace};

use super::listener::{Listener, ListenerId, PassPanic};
use super::state::{ListenersState, Update};
use crate::context::{Confined, OwnerToken};

pub struct ConfinedNotifier<T, D = ()> {
    state: Confined<RefCell<ListenersState<T, D>>>,
}

impl<T, D> ConfinedNotifier<T, D>
where
    T: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    pub fn new(owner: OwnerToken) -> Self {
        Self {
            state: Confined::new(owner, RefCell::new(ListenersState::new(None))),
        }
    }

    pub fn owner(&self) -> &OwnerToken {
        self.state.owner()
    }

    fn cell(&self) -> &RefCell<ListenersState<T, D>> {
        self.state.get()
    }

    pub fn is_observed(&self) -> bool {
        self.cell().borrow().has_listeners()
    }

    pub fn observed_state(&self) -> bool {
        self.cell().borrow().transition.next_observed
    }

    pub fn subscribe(&self, listener: Listener<T, D>, hook: &dyn Fn(bool)) {
        let became_observed = {
            let mut state = self.cell().borrow_mut();
            state.add_listener(listener);
            let became = !state.transition.next_observed;
            state.transition.next_observed = true;
            became
        };
        if became_observed {
            debug!(observed = true, "observed state transition");
            hook(true);
        }
    }

    pub fn unsubscribe(&self, id: ListenerId, hook: &dyn Fn(bool)) {
        let became_unobserved = {
            let mut state = self.cell().borrow_mut();
            let Some(listener) = state.remove_listener(id) else {
                return;
            };
            listener.cancel();
            let became = state.transition.next_observed && !state.has_listeners();
            if became {
                state.transition.next_observed = false;
            }
            became
        };
        if became_unobserved {
            debug!(observed = false, "observed state transition");
            hook(false);
        }
    }

    pub fn publish(&self, old: Arc<T>, new: Arc<T>, diff: D) {
        let update = Update {
            value: new,
            diff: Arc::new(diff),
        };
        {
            let mut state = self.cell().borrow_mut();
            if state.is_delivering() {
                // A pass is on the stack below us; it will pick this up.
                state.enqueue(update, thread::current().id());
                return;
            }
            if !state.has_listeners() {
                return;
            }
            state.enqueue(update, thread::current().id());
        }
        self.deliver(old);
    }

    fn deliver(&self, mut prev: Arc<T>) {
        trace!("took notification ownership");
        let mut panicked = PassPanic::default();
        loop {
            let head = self.cell().borrow().head().cloned();
            if let Some(update) = head {
                self.notify_all(&mut panicked, &prev, &update.value, &update.diff);
                prev = update.value;
            }
            if self.cell().borrow_mut().advance() {
                break;
            }
        }
        trace!("notification pass complete");
        panicked.resume();
    }

    fn notify_all(&self, panicked: &mut PassPanic, old: &Arc<T>, new: &Arc<T>, diff: &Arc<D>) {
        let mut index = 0;
        loop {
            let listener = match self.cell().borrow().listener_at(index) {
                None => break,
                Some(slot) => slot.cloned(),
            };
            if let Some(listener) = listener {
                panicked.notify(&listener, old, new, diff);
            }
            index += 1;
        }
    }
}
