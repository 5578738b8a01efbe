//! Two-upstream transform.

use std::sync::{Arc, Weak};

use super::{Cache, Route};
use crate::context::Confinement;
use crate::error::{PropertyError, Result};
use crate::notify::{ChangeListener, ListenerId, NotificationCore, Notifier};
use crate::property::{Prop, Property, Value};

/// `transform(a.value(), b.value())`.
///
/// A change on either side recomputes from the current values of both.
pub struct BiMapped<A: Value, B: Value, T: Value> {
    a: Prop<A>,
    b: Prop<B>,
    transform: Arc<dyn Fn(&A, &B) -> T + Send + Sync>,
    confinement: Confinement,
    routes: (Route, Route),
    notifier: Notifier<T>,
    cache: Cache<T>,
    on_a: ChangeListener<A>,
    on_b: ChangeListener<B>,
}

impl<A: Value, B: Value, T: Value> BiMapped<A, B, T> {
    pub fn new<F>(a: Prop<A>, b: Prop<B>, transform: F) -> Result<Arc<Self>>
    where
        F: Fn(&A, &B) -> T + Send + Sync + 'static,
    {
        if !a.may_change() && !b.may_change() {
            return Err(PropertyError::immutable("map with"));
        }
        Self::build(a, b, transform)
    }

    /// Constructor that skips the immutability check: at least one side may change.
    ///
    /// Fails with [`NoExecutor`](PropertyError::NoExecutor) when one side is
    /// concurrent, the other confined, and the calling thread has no executor.
    pub(crate) fn build<F>(a: Prop<A>, b: Prop<B>, transform: F) -> Result<Arc<Self>>
    where
        F: Fn(&A, &B) -> T + Send + Sync + 'static,
    {
        let confinement = Confinement::of_upstreams([a.is_concurrent(), b.is_concurrent()]);
        let routes = (
            Route::resolve(&confinement, a.is_concurrent())?,
            Route::resolve(&confinement, b.is_concurrent())?,
        );

        Ok(Arc::new_cyclic(|me: &Weak<Self>| {
            let (me_a, me_b) = (me.clone(), me.clone());
            Self {
                a,
                b,
                transform: Arc::new(transform),
                notifier: Notifier::new(&confinement),
                cache: Cache::new(&confinement),
                confinement,
                routes,
                on_a: ChangeListener::new(move |_: &A, _: &A| {
                    if let Some(this) = me_a.upgrade() {
                        this.upstream_changed();
                    }
                }),
                on_b: ChangeListener::new(move |_: &B, _: &B| {
                    if let Some(this) = me_b.upgrade() {
                        this.upstream_changed();
                    }
                }),
            }
        }))
    }

    fn compute(&self) -> T {
        (self.transform)(&self.a.value(), &self.b.value())
    }

    fn upstream_changed(&self) {
        let new = Arc::new(self.compute());
        if let Some((old, new)) = self.cache.update(|_| Arc::clone(&new)) {
            self.notifier.publish(old, new, ());
        }
    }

    fn observed_state_changed(&self, observed: bool) {
        if observed {
            self.cache.store(Some(Arc::new(self.compute())));
            if self.a.may_change() {
                self.routes.0.attach(&self.a, self.on_a.clone());
            }
            if self.b.may_change() {
                self.routes.1.attach(&self.b, self.on_b.clone());
            }
        } else {
            self.a.unsubscribe(self.on_a.id());
            self.b.unsubscribe(self.on_b.id());
            self.cache.store(None);
        }
    }
}

impl<A: Value, B: Value, T: Value> Property<T> for BiMapped<A, B, T> {
    fn value(&self) -> T {
        self.confinement.enforce();
        match self.cache.load() {
            Some(value) => (*value).clone(),
            None => self.compute(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{EventLoop, ExecutorScope};
    use crate::property::{concurrent_property_of, confined_property_of, immutable_property_of};
    use std::sync::Mutex;

    #[test]
    fn recomputes_from_both_sides() {
        let a = concurrent_property_of(1);
        let b = concurrent_property_of(10);
        let sum = BiMapped::new(a.clone().as_property(), b.clone().as_property(), |x: &i32, y: &i32| x + y)
            .unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        sum.subscribe(ChangeListener::new(move |old: &i32, new: &i32| {
            log_clone.lock().unwrap().push((*old, *new));
        }));

        a.set(2);
        b.set(20);
        assert_eq!(*log.lock().unwrap(), vec![(11, 12), (12, 22)]);
        assert_eq!(sum.value(), 22);
    }

    #[test]
    fn mixed_upstreams_make_a_confined_result() {
        let _scope = ExecutorScope::enter(Arc::new(EventLoop::new()));
        let a = concurrent_property_of(1);
        let b = confined_property_of(2);
        let product = BiMapped::new(a.as_property(), b.as_property(), |x: &i32, y: &i32| x * y).unwrap();
        assert!(!product.is_concurrent());
        assert_eq!(product.value(), 2);
    }

    #[test]
    fn mixed_upstreams_need_an_executor() {
        let a = concurrent_property_of(1);
        let b = confined_property_of(2);
        let result = BiMapped::new(a.as_property(), b.as_property(), |x: &i32, y: &i32| x * y);
        assert!(matches!(result, Err(PropertyError::NoExecutor { .. })));
    }

    #[test]
    fn one_immutable_side_is_fine_two_are_not() {
        let a = concurrent_property_of(1);
        let ok = BiMapped::new(a.clone().as_property(), immutable_property_of(5), |x: &i32, y: &i32| x + y);
        assert_eq!(ok.unwrap().value(), 6);

        let err = BiMapped::new(immutable_property_of(1), immutable_property_of(2), |x: &i32, y: &i32| x + y);
        assert!(matches!(err, Err(PropertyError::Immutable { .. })));
    }
}
