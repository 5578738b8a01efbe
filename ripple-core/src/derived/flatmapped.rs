//! Follow whichever property an upstream value selects.

use std::sync::{Arc, Weak};

use tracing::debug;

use super::{Cache, Route};
use crate::context::Confinement;
use crate::error::{PropertyError, Result};
use crate::notify::{ChangeListener, ListenerId, NotificationCore, Notifier};
use crate::property::{Prop, Property, Value};

/// The currently followed property and our listener on it.
///
/// Every switch builds a fresh link, so a delivery still in flight from the
/// previous master comes from a link that is no longer current and is ignored.
struct MasterLink<T: Value> {
    master: Prop<T>,
    listener: ChangeListener<T>,
}

/// `select(upstream.value()).value()`.
///
/// Switching masters happens under the transition lock, so no update from
/// an old master can interleave with the new one.
///
/// A confined flat map takes changes of a concurrent master through the
/// owner thread's executor. Without one, only changes published on the owner
/// thread reach it; the rest are dropped with a warning.
pub struct FlatMapped<S: Value, T: Value> {
    upstream: Prop<S>,
    select: Arc<dyn Fn(&S) -> Prop<T> + Send + Sync>,
    confinement: Confinement,
    notifier: Notifier<T>,
    cache: Cache<T>,
    link: Cache<MasterLink<T>>,
    on_upstream: ChangeListener<S>,
    me: Weak<Self>,
}

impl<S: Value, T: Value> FlatMapped<S, T> {
    pub fn new<F>(upstream: Prop<S>, select: F) -> Result<Arc<Self>>
    where
        F: Fn(&S) -> Prop<T> + Send + Sync + 'static,
    {
        if !upstream.may_change() {
            return Err(PropertyError::immutable("flat map"));
        }
        Ok(Self::build(upstream, select))
    }

    /// Unchecked constructor: `upstream` may change.
    pub(crate) fn build<F>(upstream: Prop<S>, select: F) -> Arc<Self>
    where
        F: Fn(&S) -> Prop<T> + Send + Sync + 'static,
    {
        let confinement = Confinement::new(upstream.is_concurrent());

        Arc::new_cyclic(|me: &Weak<Self>| {
            let weak = me.clone();
            Self {
                upstream,
                select: Arc::new(select),
                notifier: Notifier::new(&confinement),
                cache: Cache::new(&confinement),
                link: Cache::new(&confinement),
                confinement,
                on_upstream: ChangeListener::on_arcs(move |_old, new: &Arc<S>| {
                    if let Some(this) = weak.upgrade() {
                        this.upstream_changed(new);
                    }
                }),
                me: me.clone(),
            }
        })
    }

    fn link_to(&self, master: Prop<T>) -> Arc<MasterLink<T>> {
        let me = self.me.clone();
        Arc::new_cyclic(|link: &Weak<MasterLink<T>>| {
            let link = link.clone();
            MasterLink {
                master,
                listener: ChangeListener::on_arcs(move |_old, new: &Arc<T>| {
                    if let (Some(this), Some(link)) = (me.upgrade(), link.upgrade()) {
                        this.master_changed(&link, new);
                    }
                }),
            }
        })
    }

    fn attach(&self, link: &MasterLink<T>) {
        Route::resolve_or_guard(&self.confinement, link.master.is_concurrent())
            .attach(&link.master, link.listener.clone());
    }

    fn upstream_changed(&self, selector: &Arc<S>) {
        self.notifier.with_locked_transition(|| {
            if !self.notifier.observed_state() {
                return;
            }
            if let Some(previous) = self.link.load() {
                previous.master.unsubscribe(previous.listener.id());
            }
            let link = self.link_to((self.select)(&**selector));
            debug!(listener = %link.listener.id(), "flat map switched master");
            self.link.store(Some(Arc::clone(&link)));

            let current = Arc::new(link.master.value());
            if let Some((old, new)) = self.cache.update(|_| Arc::clone(&current)) {
                self.notifier.publish(old, new, ());
            }
            self.attach(&link);
        });
    }

    fn master_changed(&self, from: &Arc<MasterLink<T>>, new: &Arc<T>) {
        self.notifier.with_locked_transition(|| {
            let current = self.link.load();
            if !current.is_some_and(|link| Arc::ptr_eq(&link, from)) {
                return;
            }
            if let Some((old, new)) = self.cache.update(|_| Arc::clone(new)) {
                self.notifier.publish(old, new, ());
            }
        });
    }

    fn observed_state_changed(&self, observed: bool) {
        if observed {
            let link = self.link_to((self.select)(&self.upstream.value()));
            self.cache.store(Some(Arc::new(link.master.value())));
            self.link.store(Some(Arc::clone(&link)));
            self.upstream.subscribe_unconfined(self.on_upstream.clone());
            self.attach(&link);
        } else {
            if let Some(link) = self.link.swap(None) {
                link.master.unsubscribe(link.listener.id());
            }
            self.upstream.unsubscribe(self.on_upstream.id());
            self.cache.store(None);
        }
    }
}

impl<S: Value, T: Value> Property<T> for FlatMapped<S, T> {
    fn value(&self) -> T {
        self.confinement.enforce();
        match self.cache.load() {
            Some(value) => (*value).clone(),
            None => (self.select)(&self.upstream.value()).value(),
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
