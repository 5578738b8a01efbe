//! Diff-Aware Properties
//!
//! Some consumers need more than `(old, new)`: a list view wants to know
//! which rows changed, not just that the list did. A diff property delivers
//! a third argument describing the change, computed by whoever commits it.
//!
//! Diff listeners and plain change listeners share one registration list and
//! one id space, so [`Property::unsubscribe`] removes either kind.

mod calculated;
mod mutable;

pub use calculated::{calculate_diff_on, DiffCalculated};
pub use mutable::ConcurrentMutableDiff;

use crate::executor::executor_for_current_thread;
use crate::notify::{Listener, ListenerId};
use crate::property::{Property, Value};

/// A property whose listeners may also receive a diff of type `D`.
pub trait DiffProperty<T: Value, D: Send + Sync + 'static>: Property<T> {
    /// Subscribe `listener`, delivering on whichever thread publishes.
    fn subscribe_diff_unconfined(&self, listener: Listener<T, D>) -> ListenerId;

    /// Diff counterpart of [`Property::subscribe`].
    fn subscribe_diff(&self, listener: Listener<T, D>) -> ListenerId {
        let listener = match executor_for_current_thread() {
            Some(executor) if self.is_concurrent() => listener.on_executor(executor),
            _ => listener,
        };
        self.subscribe_diff_unconfined(listener)
    }
}
