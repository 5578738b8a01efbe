//! Listener bookkeeping shared by both notifier variants.
//!
//! The concurrent notifier treats a `ListenersState` as an immutable snapshot:
//! it clones, edits the clone and swaps it in with a CAS. The confined
//! notifier edits its single state in place. Both rely on the same two
//! conventions:
//!
//! - while `pending` is non-empty a notification pass is iterating
//!   `listeners` by index, so removal only tombstones a slot (`None`) and
//!   additions are queued as [`Pending::AddListener`] markers;
//! - the pass owner pops `pending[0]` after delivering it, splices in the
//!   markers that follow, and compacts tombstones once the queue drains.

use std::sync::Arc;
use std::thread::ThreadId;

use smallvec::SmallVec;

use super::listener::{Listener, ListenerId};

/// A value queued for delivery, with its diff.
pub struct Update<T, D> {
    pub value: Arc<T>,
    pub diff: Arc<D>,
}

impl<T, D> Clone for Update<T, D> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            diff: Arc::clone(&self.diff),
        }
    }
}

/// Entry of the pending queue.
pub enum Pending<T, D> {
    Update(Update<T, D>),
    /// Listener subscribed mid-pass; joins `listeners` when the pass reaches it.
    AddListener(Listener<T, D>),
}

impl<T, D> Clone for Pending<T, D> {
    fn clone(&self) -> Self {
        match self {
            Self::Update(update) => Self::Update(update.clone()),
            Self::AddListener(listener) => Self::AddListener(listener.clone()),
        }
    }
}

/// Observed-state transition flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transition {
    /// Target observed state; equal to the applied state when idle.
    pub next_observed: bool,
    /// Thread currently running the observed-state hook.
    pub running_on: Option<ThreadId>,
    /// Thread holding the transition lock.
    pub locked_by: Option<ThreadId>,
}

/// Registered listeners and the queue of a notifier.
pub struct ListenersState<T, D> {
    /// Registration order. `None` marks a slot removed during the current pass.
    pub listeners: SmallVec<[Option<Listener<T, D>>; 4]>,
    /// Updates still to deliver, head first. Non-empty exactly while a pass runs.
    pub pending: SmallVec<[Pending<T, D>; 4]>,
    /// Most recently enqueued value. Kept between passes only when `chained`.
    pub last: Option<Arc<T>>,
    /// Whether `last` tracks the committed value chain across passes.
    pub chained: bool,
    /// Thread owning the current pass.
    pub delivering_on: Option<ThreadId>,
    pub transition: Transition,
}

impl<T, D> Clone for ListenersState<T, D> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
            pending: self.pending.clone(),
            last: self.last.clone(),
            chained: self.chained,
            delivering_on: self.delivering_on,
            transition: self.transition,
        }
    }
}

impl<T, D> ListenersState<T, D> {
    pub fn new(last: Option<Arc<T>>) -> Self {
        Self {
            listeners: SmallVec::new(),
            pending: SmallVec::new(),
            chained: last.is_some(),
            last,
            delivering_on: None,
            transition: Transition::default(),
        }
    }

    pub fn is_delivering(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Live listeners plus listeners waiting to be spliced in.
    pub fn has_listeners(&self) -> bool {
        self.listeners.iter().any(Option::is_some)
            || self
                .pending
                .iter()
                .any(|entry| matches!(entry, Pending::AddListener(_)))
    }

    pub fn add_listener(&mut self, listener: Listener<T, D>) {
        if self.is_delivering() {
            self.pending.push(Pending::AddListener(listener));
        } else {
            self.listeners.push(Some(listener));
        }
    }

    /// Remove the first registration with `id`; `None` if there is none.
    pub fn remove_listener(&mut self, id: ListenerId) -> Option<Listener<T, D>> {
        let slot = self
            .listeners
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|l| l.id() == id));
        if let Some(index) = slot {
            return if self.is_delivering() {
                self.listeners[index].take()
            } else {
                self.listeners.remove(index)
            };
        }

        let queued = self.pending.iter().position(
            |entry| matches!(entry, Pending::AddListener(l) if l.id() == id),
        )?;
        match self.pending.remove(queued) {
            Pending::AddListener(listener) => Some(listener),
            Pending::Update(_) => None,
        }
    }

    /// Queue `update`; returns `true` if this starts a new pass.
    pub fn enqueue(&mut self, update: Update<T, D>, on: ThreadId) -> bool {
        let starts = !self.is_delivering();
        if starts {
            self.delivering_on = Some(on);
        }
        self.last = Some(Arc::clone(&update.value));
        self.pending.push(Pending::Update(update));
        starts
    }

    /// Update currently being delivered.
    pub fn head(&self) -> Option<&Update<T, D>> {
        match self.pending.first() {
            Some(Pending::Update(update)) => Some(update),
            _ => None,
        }
    }

    /// Pop the delivered head and splice in the listeners queued behind it.
    ///
    /// Returns `true` when the pass is over.
    pub fn advance(&mut self) -> bool {
        if !self.pending.is_empty() {
            self.pending.remove(0);
        }
        while let Some(Pending::AddListener(_)) = self.pending.first() {
            if let Pending::AddListener(listener) = self.pending.remove(0) {
                self.listeners.push(Some(listener));
            }
        }

        let done = self.pending.is_empty();
        if done {
            self.listeners.retain(|slot| slot.is_some());
            self.delivering_on = None;
            if !self.chained {
                self.last = None;
            }
        }
        done
    }

    pub fn listener_at(&self, index: usize) -> Option<Option<&Listener<T, D>>> {
        self.listeners.get(index).map(Option::as_ref)
    }
}
