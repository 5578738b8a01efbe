//! Builder methods on property handles.
//!
//! Every builder degenerates when its upstreams can never change: mapping an
//! immutable property gives an immutable property holding the mapped value,
//! distinct or debounce of one gives the property back.
//!
//! Builders that can combine a concurrent and a confined upstream return a
//! [`Result`]: the combination is confined to the calling thread and needs
//! that thread's executor.

use std::sync::Arc;
use std::time::Duration;

use super::{immutable_property_of, Bound, MutProp, Prop, Value};
use crate::derived::{BiMapped, Debounced, Distinct, FlatMapped, Mapped};
use crate::error::Result;
use crate::executor::{InPlaceWorker, Scheduler, Worker};
use crate::notify::{ChangeListener, ListenerId};

/// Derived-property builders, available on [`Prop`] and [`MutProp`].
pub trait PropertyExt<T: Value> {
    /// This handle as a read-only property.
    fn to_property(&self) -> Prop<T>;

    /// `transform(value)`, recomputed on the publishing thread.
    fn map<U, F>(&self, transform: F) -> Prop<U>
    where
        U: Value,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let source = self.to_property();
        if !source.may_change() {
            return immutable_property_of(transform(&source.value()));
        }
        Mapped::build(source, Arc::new(InPlaceWorker), None, transform)
    }

    /// `transform(value)`, recomputed by `worker`.
    ///
    /// Fails with [`NoExecutor`](crate::PropertyError::NoExecutor) when a
    /// confined source is computed off-thread and the calling thread has no
    /// executor to bring results back through.
    fn map_on<U, F>(&self, worker: Arc<dyn Worker>, transform: F) -> Result<Prop<U>>
    where
        U: Value,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let source = self.to_property();
        if !source.may_change() {
            return Ok(immutable_property_of(transform(&source.value())));
        }
        let mapped: Prop<U> = Mapped::with_worker(source, worker, transform)?;
        Ok(mapped)
    }

    /// `transform(value, other.value())`.
    ///
    /// Fails with [`NoExecutor`](crate::PropertyError::NoExecutor) when one
    /// side is concurrent, the other confined, and the calling thread has no
    /// executor.
    fn map_with<O, U, F>(&self, other: &Prop<O>, transform: F) -> Result<Prop<U>>
    where
        O: Value,
        U: Value,
        F: Fn(&T, &O) -> U + Send + Sync + 'static,
    {
        let source = self.to_property();
        if !source.may_change() && !other.may_change() {
            return Ok(immutable_property_of(transform(&source.value(), &other.value())));
        }
        let combined: Prop<U> = BiMapped::build(source, Arc::clone(other), transform)?;
        Ok(combined)
    }

    /// Both values as a pair. Same failure as [`map_with`](Self::map_with).
    fn zip_with<O: Value>(&self, other: &Prop<O>) -> Result<Prop<(T, O)>> {
        self.map_with(other, |a: &T, b: &O| (a.clone(), b.clone()))
    }

    /// Follow whichever property `select(value)` returns.
    fn flat_map<U, F>(&self, select: F) -> Prop<U>
    where
        U: Value,
        F: Fn(&T) -> Prop<U> + Send + Sync + 'static,
    {
        let source = self.to_property();
        if !source.may_change() {
            return select(&source.value());
        }
        FlatMapped::build(source, select)
    }

    /// Like [`flat_map`](Self::flat_map), reading `default` while `select`
    /// returns `None`.
    fn flat_map_or_default<U, F>(&self, default: U, select: F) -> Prop<U>
    where
        U: Value,
        F: Fn(&T) -> Option<Prop<U>> + Send + Sync + 'static,
    {
        let fallback = immutable_property_of(default);
        self.flat_map(move |value: &T| select(value).unwrap_or_else(|| Arc::clone(&fallback)))
    }

    /// Drops changes for which `are_equal(old, new)` holds.
    fn distinct<F>(&self, are_equal: F) -> Prop<T>
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let source = self.to_property();
        if !source.may_change() {
            return source;
        }
        Distinct::build(source, are_equal)
    }

    /// [`distinct`](Self::distinct) by `==`.
    fn distinct_eq(&self) -> Prop<T>
    where
        T: PartialEq,
    {
        self.distinct(|a: &T, b: &T| a == b)
    }

    /// Publish only after `delay` passes without another change, using the
    /// shared scheduler.
    fn debounce(&self, delay: Duration) -> Result<Prop<T>> {
        let source = self.to_property();
        if !source.may_change() {
            return Ok(source);
        }
        let debounced: Prop<T> = Debounced::new(source, delay)?;
        Ok(debounced)
    }

    fn debounce_on(&self, delay: Duration, scheduler: Arc<dyn Scheduler>) -> Result<Prop<T>> {
        let source = self.to_property();
        if !source.may_change() {
            return Ok(source);
        }
        let debounced: Prop<T> = Debounced::with_scheduler(source, delay, scheduler)?;
        Ok(debounced)
    }

    /// A view that tracks this property but cannot be written through.
    fn read_only_view(&self) -> Prop<T> {
        self.map(T::clone)
    }

    /// Subscribe an `(old, new)` callback. See [`Property::subscribe`](super::Property::subscribe).
    fn on_change<F>(&self, on_change: F) -> ListenerId
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        self.to_property().subscribe(ChangeListener::new(on_change))
    }

    /// Call `f` with the current value now and with every new value after.
    fn on_each<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let source = self.to_property();
        f(&source.value());
        source.subscribe(ChangeListener::new(move |_: &T, new: &T| f(new)))
    }

    /// Subscribe `listener` and catch it up, or unsubscribe it.
    ///
    /// Subscribing calls the listener with `(stale, value)` right away.
    /// Unsubscribing only removes it.
    fn sync_if(&self, subscribe: bool, listener: &ChangeListener<T>, stale: T) {
        let source = self.to_property();
        if subscribe {
            source.subscribe(listener.clone());
            listener.notify(&Arc::new(stale), &Arc::new(source.value()), &Arc::new(()));
        } else {
            source.unsubscribe(listener.id());
        }
    }

    /// Like [`sync_if`](Self::sync_if), but unsubscribing also resets the
    /// listener with `(value, dummy)`.
    fn sync_using_dummy_if(&self, subscribe: bool, listener: &ChangeListener<T>, dummy: T) {
        let source = self.to_property();
        let dummy = Arc::new(dummy);
        let current = Arc::new(source.value());
        if subscribe {
            source.subscribe(listener.clone());
            listener.notify(&dummy, &current, &Arc::new(()));
        } else {
            source.unsubscribe(listener.id());
            listener.notify(&current, &dummy, &Arc::new(()));
        }
    }
}

impl<T: Value> PropertyExt<T> for Prop<T> {
    fn to_property(&self) -> Prop<T> {
        Arc::clone(self)
    }
}

impl<T: Value + PartialEq> PropertyExt<T> for MutProp<T> {
    fn to_property(&self) -> Prop<T> {
        Arc::clone(self).as_property()
    }
}

/// Read-modify-write helpers and two-way binding for [`MutProp`].
pub trait MutablePropertyExt<T: Value + PartialEq> {
    /// Replace the value with `f(value)`, retrying until no other writer intervenes.
    fn update<F: Fn(&T) -> T>(&self, f: F);

    /// [`update`](Self::update), returning the value it replaced.
    fn get_and_update<F: Fn(&T) -> T>(&self, f: F) -> T;

    /// [`update`](Self::update), returning the value it committed.
    fn update_and_get<F: Fn(&T) -> T>(&self, f: F) -> T;

    /// Drop the binding, if any, keeping the current value.
    fn unbind(&self);

    /// A mutable view reading `forward(value)` and writing `backward(view value)`.
    fn bind<U, F, B>(&self, forward: F, backward: B) -> MutProp<U>
    where
        U: Value + PartialEq,
        F: Fn(&T) -> U + Send + Sync + 'static,
        B: Fn(&U) -> T + Send + Sync + 'static;
}

impl<T: Value + PartialEq> MutablePropertyExt<T> for MutProp<T> {
    fn update<F: Fn(&T) -> T>(&self, f: F) {
        self.get_and_update(f);
    }

    fn get_and_update<F: Fn(&T) -> T>(&self, f: F) -> T {
        loop {
            let current = self.value();
            if self.compare_and_set(&current, f(&current)) {
                return current;
            }
        }
    }

    fn update_and_get<F: Fn(&T) -> T>(&self, f: F) -> T {
        loop {
            let current = self.value();
            let next = f(&current);
            if self.compare_and_set(&current, next.clone()) {
                return next;
            }
        }
    }

    fn unbind(&self) {
        self.set(self.value());
    }

    fn bind<U, F, B>(&self, forward: F, backward: B) -> MutProp<U>
    where
        U: Value + PartialEq,
        F: Fn(&T) -> U + Send + Sync + 'static,
        B: Fn(&U) -> T + Send + Sync + 'static,
    {
        Bound::new(Arc::clone(self), forward, backward)
    }
}

/// Boolean combinators.
pub trait BoolPropertyExt: PropertyExt<bool> {
    fn not(&self) -> Prop<bool> {
        self.map(|b: &bool| !b)
    }

    /// `value && other.value()`, built with [`map_with`](PropertyExt::map_with).
    fn and(&self, other: &Prop<bool>) -> Result<Prop<bool>> {
        self.map_with(other, |a: &bool, b: &bool| *a && *b)
    }

    /// `value || other.value()`, built with [`map_with`](PropertyExt::map_with).
    fn or(&self, other: &Prop<bool>) -> Result<Prop<bool>> {
        self.map_with(other, |a: &bool, b: &bool| *a || *b)
    }
}

impl<P: PropertyExt<bool>> BoolPropertyExt for P {}

pub trait MutableBoolExt {
    /// Negate the value; returns the new one.
    fn flip(&self) -> bool;
}

impl MutableBoolExt for MutProp<bool> {
    fn flip(&self) -> bool {
        self.update_and_get(|b: &bool| !b)
    }
}
