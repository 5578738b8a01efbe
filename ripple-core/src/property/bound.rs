//! Two-way mapped view of a mutable property.

use std::sync::Arc;

use super::{MutProp, MutableProperty, Prop, Property, Value};
use crate::derived::Mapped;
use crate::error::Result;
use crate::executor::InPlaceWorker;
use crate::notify::{ChangeListener, ListenerId};

/// Reads as `forward(origin.value())`; writes go to `origin` through `backward`.
///
/// Round-trips are exact only if `backward(forward(x)) == x`.
pub struct Bound<S: Value, T: Value> {
    origin: MutProp<S>,
    view: Arc<Mapped<S, T>>,
    backward: Arc<dyn Fn(&T) -> S + Send + Sync>,
}

impl<S, T> Bound<S, T>
where
    S: Value + PartialEq,
    T: Value + PartialEq,
{
    pub fn new<F, B>(origin: MutProp<S>, forward: F, backward: B) -> Arc<Self>
    where
        F: Fn(&S) -> T + Send + Sync + 'static,
        B: Fn(&T) -> S + Send + Sync + 'static,
    {
        let view = Mapped::build(
            Arc::clone(&origin).as_property(),
            Arc::new(InPlaceWorker),
            None,
            forward,
        );
        Arc::new(Self {
            origin,
            view,
            backward: Arc::new(backward),
        })
    }
}

impl<S, T> Property<T> for Bound<S, T>
where
    S: Value + PartialEq,
    T: Value + PartialEq,
{
    fn value(&self) -> T {
        self.view.value()
    }

    fn may_change(&self) -> bool {
        true
    }

    fn is_concurrent(&self) -> bool {
        self.view.is_concurrent()
    }

    fn check_thread(&self) -> Result<()> {
        self.view.check_thread()
    }

    fn subscribe_unconfined(&self, listener: ChangeListener<T>) -> ListenerId {
        self.view.subscribe_unconfined(listener)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.view.unsubscribe(id);
    }
}

impl<S, T> MutableProperty<T> for Bound<S, T>
where
    S: Value + PartialEq,
    T: Value + PartialEq,
{
    fn set(&self, value: T) {
        self.origin.set((self.backward)(&value));
    }

    fn compare_and_set(&self, expected: &T, new: T) -> bool {
        self.origin
            .compare_and_set(&(self.backward)(expected), (self.backward)(&new))
    }

    fn bind_to(&self, upstream: Prop<T>) -> Result<()> {
        if !upstream.may_change() {
            self.set(upstream.value());
            return Ok(());
        }
        let backward = Arc::clone(&self.backward);
        let mapped = Mapped::build(upstream, Arc::new(InPlaceWorker), None, move |value: &T| {
            backward(value)
        });
        self.origin.bind_to(mapped)
    }

    fn as_property(self: Arc<Self>) -> Prop<T> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::concurrent_property_of;
    use std::sync::Mutex;

    #[test]
    fn writes_go_back_through_the_inverse() {
        let cents = concurrent_property_of(250_i64);
        let euros = Bound::new(
            cents.clone(),
            |c: &i64| *c as f64 / 100.0,
            |e: &f64| (e * 100.0).round() as i64,
        );
        assert_eq!(euros.value(), 2.5);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        cents.subscribe(ChangeListener::new(move |_: &i64, new: &i64| {
            seen_clone.lock().unwrap().push(*new);
        }));

        euros.set(3.75);
        assert_eq!(cents.value(), 375);
        assert_eq!(*seen.lock().unwrap(), vec![375]);
    }

    #[test]
    fn compare_and_set_maps_both_sides() {
        let n = concurrent_property_of(4);
        let doubled = Bound::new(n.clone(), |v: &i32| v * 2, |v: &i32| v / 2);
        assert!(!doubled.compare_and_set(&6, 10));
        assert!(doubled.compare_and_set(&8, 10));
        assert_eq!(n.value(), 5);
    }

    #[test]
    fn binding_the_view_binds_the_origin() {
        let n = concurrent_property_of(0);
        let negated = Bound::new(n.clone(), |v: &i32| -v, |v: &i32| -v);
        let driver = concurrent_property_of(7);

        negated.bind_to(driver.clone().as_property()).unwrap();
        assert_eq!(n.value(), -7);
        driver.set(8);
        assert_eq!(negated.value(), 8);
    }
}
