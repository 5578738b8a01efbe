//! Drop changes an equivalence says are no-ops.

use std::sync::{Arc, Weak};

use crate::context::Confinement;
use crate::error::{PropertyError, Result};
use crate::notify::{ChangeListener, ListenerId, NotificationCore, Notifier};
use crate::property::{Prop, Property, Value};

/// Republishes upstream changes except those where `are_equal(old, new)`.
///
/// Holds no value of its own; `value()` reads the upstream.
pub struct Distinct<T: Value> {
    upstream: Prop<T>,
    are_equal: Arc<dyn Fn(&T, &T) -> bool + Send + Sync>,
    confinement: Confinement,
    notifier: Notifier<T>,
    on_upstream: ChangeListener<T>,
}

impl<T: Value> Distinct<T> {
    pub fn new<F>(upstream: Prop<T>, are_equal: F) -> Result<Arc<Self>>
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        if !upstream.may_change() {
            return Err(PropertyError::immutable("distinct"));
        }
        Ok(Self::build(upstream, are_equal))
    }

    /// Unchecked constructor: `upstream` may change.
    pub(crate) fn build<F>(upstream: Prop<T>, are_equal: F) -> Arc<Self>
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let confinement = Confinement::new(upstream.is_concurrent());

        Arc::new_cyclic(|me: &Weak<Self>| {
            let me = me.clone();
            Self {
                upstream,
                are_equal: Arc::new(are_equal),
                notifier: Notifier::new(&confinement),
                confinement,
                on_upstream: ChangeListener::on_arcs(move |old, new| {
                    if let Some(this) = me.upgrade() {
                        this.upstream_changed(old, new);
                    }
                }),
            }
        })
    }

    fn upstream_changed(&self, old: &Arc<T>, new: &Arc<T>) {
        if !(self.are_equal)(&**old, &**new) {
            self.notifier.publish(Arc::clone(old), Arc::clone(new), ());
        }
    }

    fn observed_state_changed(&self, observed: bool) {
        if observed {
            self.upstream.subscribe_unconfined(self.on_upstream.clone());
        } else {
            self.upstream.unsubscribe(self.on_upstream.id());
        }
    }
}

impl<T: Value> Property<T> for Distinct<T> {
    fn value(&self) -> T {
        self.confinement.enforce();
        self.upstream.value()
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
