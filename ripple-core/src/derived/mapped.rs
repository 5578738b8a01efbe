//! Single-upstream transform.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::Cache;
use crate::context::Confinement;
use crate::error::{PropertyError, Result};
use crate::executor::{require_current, Executor, InPlaceWorker, Worker};
use crate::notify::{ChangeListener, ListenerId, NotificationCore, Notifier};
use crate::property::{Prop, Property, Value};

pub(crate) type Transform<S, T> = dyn Fn(&S) -> T + Send + Sync;

/// `transform(upstream.value())`, recomputed on every upstream change.
///
/// With a worker that is not in place, recomputation happens wherever the
/// worker runs it; a confined property then hops the result back to its
/// owner thread. Results overtaken by a newer upstream change, or arriving
/// after the last listener left, are dropped.
pub struct Mapped<S: Value, T: Value> {
    upstream: Prop<S>,
    transform: Arc<Transform<S, T>>,
    worker: Arc<dyn Worker>,
    confinement: Confinement,
    /// Owner executor for confined properties computed off-thread.
    home: Option<Arc<dyn Executor>>,
    notifier: Notifier<T>,
    cache: Cache<T>,
    /// Bumped on every upstream change and on unobservation.
    generation: AtomicU64,
    on_upstream: ChangeListener<S>,
}

impl<S: Value, T: Value> Mapped<S, T> {
    pub fn new<F>(upstream: Prop<S>, transform: F) -> Result<Arc<Self>>
    where
        F: Fn(&S) -> T + Send + Sync + 'static,
    {
        Self::with_worker(upstream, Arc::new(InPlaceWorker), transform)
    }

    /// Recompute through `worker`.
    ///
    /// Fails with [`PropertyError::NoExecutor`] if the result would have to
    /// hop back to a confined owner thread that has no executor.
    pub fn with_worker<F>(upstream: Prop<S>, worker: Arc<dyn Worker>, transform: F) -> Result<Arc<Self>>
    where
        F: Fn(&S) -> T + Send + Sync + 'static,
    {
        if !upstream.may_change() {
            return Err(PropertyError::immutable("map"));
        }
        let home = if upstream.is_concurrent() || worker.is_in_place() {
            None
        } else {
            Some(require_current()?)
        };
        Ok(Self::build(upstream, worker, home, transform))
    }

    /// Unchecked constructor: `upstream` may change, and `home` is present
    /// whenever a confined result is computed off-thread.
    pub(crate) fn build<F>(
        upstream: Prop<S>,
        worker: Arc<dyn Worker>,
        home: Option<Arc<dyn Executor>>,
        transform: F,
    ) -> Arc<Self>
    where
        F: Fn(&S) -> T + Send + Sync + 'static,
    {
        let confinement = Confinement::new(upstream.is_concurrent());

        Arc::new_cyclic(|me: &Weak<Self>| {
            let me = me.clone();
            Self {
                upstream,
                transform: Arc::new(transform),
                worker,
                notifier: Notifier::new(&confinement),
                cache: Cache::new(&confinement),
                confinement,
                home,
                generation: AtomicU64::new(0),
                on_upstream: ChangeListener::on_arcs(move |_old, new: &Arc<S>| {
                    if let Some(this) = me.upgrade() {
                        this.upstream_changed(Arc::clone(new));
                    }
                }),
            }
        })
    }

    fn upstream_changed(self: Arc<Self>, new: Arc<S>) {
        if self.worker.is_in_place() {
            let mapped = Arc::new((self.transform)(&*new));
            self.commit(mapped);
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let worker = Arc::clone(&self.worker);
        worker.run(Box::new(move || {
            let mapped = Arc::new((self.transform)(&*new));
            match self.home.clone() {
                Some(home) => home.execute(Box::new(move || {
                    self.commit_if_current(generation, mapped);
                })),
                None => self.commit_if_current(generation, mapped),
            }
        }));
    }

    fn commit_if_current(&self, generation: u64, mapped: Arc<T>) {
        if self.generation.load(Ordering::Acquire) == generation {
            self.commit(mapped);
        }
    }

    fn commit(&self, mapped: Arc<T>) {
        if let Some((old, new)) = self.cache.update(|_| Arc::clone(&mapped)) {
            self.notifier.publish(old, new, ());
        }
    }

    fn observed_state_changed(&self, observed: bool) {
        if observed {
            let mapped = (self.transform)(&self.upstream.value());
            self.cache.store(Some(Arc::new(mapped)));
            self.upstream.subscribe_unconfined(self.on_upstream.clone());
        } else {
            self.upstream.unsubscribe(self.on_upstream.id());
            self.generation.fetch_add(1, Ordering::AcqRel);
            self.cache.store(None);
        }
    }
}

impl<S: Value, T: Value> Property<T> for Mapped<S, T> {
    fn value(&self) -> T {
        self.confinement.enforce();
        match self.cache.load() {
            Some(value) => (*value).clone(),
            None => (self.transform)(&self.upstream.value()),
        }
    }

    fn may_change(&self) -> bool {
        true
    }

    fn is_concurrent(&self) -> bool {
        self.confinement.is_concurrent()
    }

    fn check_thread(&self) -> Result<()> {
        self.confinement.check()
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
