//! Properties
//!
//! A property is an observable value: read it with [`Property::value`],
//! learn about changes with [`Property::subscribe`]. Mutable properties add
//! `set`, `compare_and_set` and `bind_to`.
//!
//! # Handles
//!
//! Properties are shared as trait objects: [`Prop<T>`] for read access and
//! [`MutProp<T>`] for read-write access. Builders such as
//! [`PropertyExt::map`] take a handle and return a new one.
//!
//! ```rust,ignore
//! let celsius = concurrent_property_of(20.0);
//! let fahrenheit = celsius.map(|c| c * 9.0 / 5.0 + 32.0);
//! fahrenheit.on_change(|old, new| println!("{old} -> {new}"));
//! celsius.set(25.0);
//! ```
//!
//! # Concurrent vs. Confined
//!
//! A concurrent property may be touched from any thread. A confined one
//! belongs to the thread that created it; touching it from elsewhere panics
//! with a message naming both threads ([`Property::check_thread`] gives the
//! typed error instead).

mod bound;
mod bulk;
mod contents;
mod ext;
mod immutable;
mod mutable;

pub use bound::Bound;
pub use bulk::{
    all_values, any_value, contains_all_values, contains_value, filter_values, first_value,
    fold_values, map_all, map_value_list, value_list,
};
pub use contents::{Emptiable, EmptinessExt, StrPropertyExt};
pub use ext::{BoolPropertyExt, MutableBoolExt, MutablePropertyExt, PropertyExt};
pub use immutable::Immutable;
pub use mutable::{ConcurrentMutable, ConfinedMutable};

use std::sync::Arc;
use std::time::Duration;

use crate::derived::Periodic;
use crate::error::Result;
use crate::executor::{executor_for_current_thread, Executor};
use crate::notify::{ChangeListener, ListenerId};

/// Anything a property can hold.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + Send + Sync + 'static {}

/// Shared read-only property handle.
pub type Prop<T> = Arc<dyn Property<T>>;

/// Shared mutable property handle.
pub type MutProp<T> = Arc<dyn MutableProperty<T>>;

/// The read contract every property fulfills.
pub trait Property<T: Value>: Send + Sync {
    /// Most recently committed value.
    fn value(&self) -> T;

    /// `false` for properties that can never change; subscribing to them is a no-op.
    fn may_change(&self) -> bool;

    /// Whether this property may be touched from any thread.
    fn is_concurrent(&self) -> bool;

    /// Subscribe `listener`, delivering on whichever thread publishes.
    fn subscribe_unconfined(&self, listener: ChangeListener<T>) -> ListenerId;

    /// Remove the first registration with `id`. Unknown ids are ignored.
    fn unsubscribe(&self, id: ListenerId);

    /// Fails with [`PropertyError::WrongThread`](crate::PropertyError::WrongThread)
    /// when called off the owner thread of a confined property.
    fn check_thread(&self) -> Result<()> {
        Ok(())
    }

    /// Subscribe `listener` to be called on the current thread's executor.
    ///
    /// Concurrent properties deliver through the executor registered with
    /// [`ExecutorScope`](crate::ExecutorScope), or in place if there is none.
    /// Confined properties always deliver in place, on their owner thread.
    fn subscribe(&self, listener: ChangeListener<T>) -> ListenerId {
        let listener = match executor_for_current_thread() {
            Some(executor) if self.is_concurrent() => listener.on_executor(executor),
            _ => listener,
        };
        self.subscribe_unconfined(listener)
    }

    /// Subscribe `listener` to be called on `executor`.
    fn subscribe_on(&self, executor: Arc<dyn Executor>, listener: ChangeListener<T>) -> ListenerId {
        self.subscribe_unconfined(listener.on_executor(executor))
    }
}

/// A property that can be written to.
pub trait MutableProperty<T: Value + PartialEq>: Property<T> {
    /// Commit `value` and notify. Drops the binding, if any.
    fn set(&self, value: T);

    /// Commit `new` only if the current value equals `expected`.
    ///
    /// Returns `false` on mismatch or on a lost race; never blocks except
    /// while a concurrent rebinding completes.
    fn compare_and_set(&self, expected: &T, new: T) -> bool;

    /// Mirror `upstream` until the next `set` or `bind_to`.
    ///
    /// Binding to a property that can never change is a one-time `set`.
    /// A confined property bound to a concurrent upstream needs an executor
    /// on the calling thread; without one this fails with
    /// [`NoExecutor`](crate::PropertyError::NoExecutor) and the property is left as it was.
    fn bind_to(&self, upstream: Prop<T>) -> Result<()>;

    /// This property as a read-only handle.
    fn as_property(self: Arc<Self>) -> Prop<T>;
}

/// A property that can never change.
pub fn immutable_property_of<T: Value>(value: T) -> Prop<T> {
    Arc::new(Immutable::new(value))
}

/// A mutable property that may be touched from any thread.
pub fn concurrent_property_of<T: Value + PartialEq>(value: T) -> MutProp<T> {
    ConcurrentMutable::new(value)
}

/// A mutable property confined to the calling thread.
pub fn confined_property_of<T: Value + PartialEq>(value: T) -> MutProp<T> {
    ConfinedMutable::new(value)
}

/// Concurrent or confined mutable property.
pub fn property_of<T: Value + PartialEq>(value: T, concurrent: bool) -> MutProp<T> {
    if concurrent {
        concurrent_property_of(value)
    } else {
        confined_property_of(value)
    }
}

/// `compute()`, refreshed every `period` on the shared scheduler while observed.
pub fn updated_every<T, F>(period: Duration, compute: F) -> Result<Prop<T>>
where
    T: Value,
    F: Fn() -> T + Send + Sync + 'static,
{
    let periodic: Prop<T> = Periodic::new(period, compute)?;
    Ok(periodic)
}
