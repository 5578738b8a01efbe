//! Listener types.
//!
//! A listener is a callback plus an identity. The identity is what
//! `unsubscribe` matches on, so the same closure can be subscribed twice and
//! removed one registration at a time.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::executor::Executor;

/// Unique identifier for a listener registration.
///
/// Ids come from a process-wide atomic counter, so they never collide across
/// properties or threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

pub(crate) type NotifyFn<T, D> = dyn Fn(&Arc<T>, &Arc<T>, &Arc<D>) + Send + Sync;

/// A change listener carrying a diff of type `D` alongside `(old, new)`.
///
/// Plain properties use `D = ()`; see [`ChangeListener`].
pub struct Listener<T, D = ()> {
    id: ListenerId,
    notify: Arc<NotifyFn<T, D>>,
    /// Set when the listener is removed; only present for listeners that
    /// hop onto an executor, so queued-but-not-run deliveries can be skipped.
    cancelled: Option<Arc<AtomicBool>>,
}

/// Listener of `(old, new)` pairs without a diff.
pub type ChangeListener<T> = Listener<T, ()>;

impl<T> Listener<T, ()>
where
    T: Send + Sync + 'static,
{
    /// Create a listener from an `(old, new)` callback.
    pub fn new<F>(on_change: F) -> Self
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        Self::from_fn(move |old: &Arc<T>, new: &Arc<T>, _: &Arc<()>| on_change(old, new))
    }

    /// The same callback, registered on a notifier that delivers diffs too.
    pub(crate) fn ignoring_diff<D>(self) -> Listener<T, D>
    where
        D: Send + Sync + 'static,
    {
        let unit = Arc::new(());
        let inner = self.notify;
        Listener {
            id: self.id,
            notify: Arc::new(move |old: &Arc<T>, new: &Arc<T>, _: &Arc<D>| inner(old, new, &unit)),
            cancelled: self.cancelled,
        }
    }

    /// Create a listener receiving the committed `Arc`s themselves.
    ///
    /// Used where the receiver wants to keep the value without cloning it.
    pub fn on_arcs<F>(on_change: F) -> Self
    where
        F: Fn(&Arc<T>, &Arc<T>) + Send + Sync + 'static,
    {
        Self::from_fn(move |old: &Arc<T>, new: &Arc<T>, _: &Arc<()>| on_change(old, new))
    }
}

impl<T, D> Listener<T, D>
where
    T: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    /// Create a listener receiving `(old, new, diff)`.
    pub fn with_diff<F>(on_change: F) -> Self
    where
        F: Fn(&T, &T, &D) + Send + Sync + 'static,
    {
        Self::from_fn(move |old: &Arc<T>, new: &Arc<T>, diff: &Arc<D>| {
            on_change(old, new, diff)
        })
    }

    pub(crate) fn from_fn<F>(notify: F) -> Self
    where
        F: Fn(&Arc<T>, &Arc<T>, &Arc<D>) + Send + Sync + 'static,
    {
        Self {
            id: ListenerId::new(),
            notify: Arc::new(notify),
            cancelled: None,
        }
    }

    /// The same callback registered under a caller-chosen id.
    ///
    /// For callbacks that need to know their own id, e.g. to unsubscribe themselves.
    pub(crate) fn with_id(self, id: ListenerId) -> Self {
        Self { id, ..self }
    }

    /// Wrap this listener so that every delivery is posted to `executor`.
    ///
    /// The id is kept, so unsubscribing the original id removes the wrapper
    /// and cancels deliveries that were posted but have not run yet.
    pub fn on_executor(self, executor: Arc<dyn Executor>) -> Self {
        if executor.is_in_place() {
            return self;
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let inner = self.notify;
        let notify = move |old: &Arc<T>, new: &Arc<T>, diff: &Arc<D>| {
            if flag.load(Ordering::Acquire) {
                return;
            }
            let (old, new, diff) = (Arc::clone(old), Arc::clone(new), Arc::clone(diff));
            let inner = Arc::clone(&inner);
            let flag = Arc::clone(&flag);
            executor.execute(Box::new(move || {
                if !flag.load(Ordering::Acquire) {
                    inner(&old, &new, &diff);
                }
            }));
        };
        Self {
            id: self.id,
            notify: Arc::new(notify),
            cancelled: Some(cancelled),
        }
    }
}

impl<T, D> Listener<T, D> {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Deliver one change.
    pub fn notify(&self, old: &Arc<T>, new: &Arc<T>, diff: &Arc<D>) {
        (self.notify)(old, new, diff);
    }

    /// Mark as removed; executor-posted deliveries that have not run yet are dropped.
    pub(crate) fn cancel(&self) {
        if let Some(flag) = &self.cancelled {
            flag.store(true, Ordering::Release);
        }
    }
}

/// First panic raised by a listener during a notification pass.
///
/// The pass keeps delivering to the remaining listeners and updates, then
/// the publisher that owned it re-raises the panic with [`resume`](Self::resume).
#[derive(Default)]
pub(crate) struct PassPanic(Option<Box<dyn Any + Send>>);

impl PassPanic {
    pub(crate) fn notify<T, D>(&mut self, listener: &Listener<T, D>, old: &Arc<T>, new: &Arc<T>, diff: &Arc<D>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.notify(old, new, diff)));
        if let Err(payload) = outcome {
            warn!(listener = %listener.id(), "listener panicked, delivery continues");
            self.0.get_or_insert(payload);
        }
    }

    pub(crate) fn resume(self) {
        if let Some(payload) = self.0 {
            panic::resume_unwind(payload);
        }
    }
}

impl<T, D> Clone for Listener<T, D> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            notify: Arc::clone(&self.notify),
            cancelled: self.cancelled.clone(),
        }
    }
}

impl<T, D> fmt::Debug for Listener<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("posted", &self.cancelled.is_some())
            .finish()
    }
}
