//! Constant properties.

use std::sync::Arc;

use super::{Property, Value};
use crate::notify::{ChangeListener, ListenerId};

/// A property holding one value forever.
///
/// It never notifies, so listeners are dropped on the floor. It is
/// concurrent: a value that never changes is safe to read anywhere.
#[derive(Debug)]
pub struct Immutable<T> {
    value: Arc<T>,
}

impl<T: Value> Immutable<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(value),
        }
    }
}

impl<T: Value> Property<T> for Immutable<T> {
    fn value(&self) -> T {
        (*self.value).clone()
    }

    fn may_change(&self) -> bool {
        false
    }

    fn is_concurrent(&self) -> bool {
        true
    }

    fn subscribe_unconfined(&self, listener: ChangeListener<T>) -> ListenerId {
        listener.id()
    }

    fn unsubscribe(&self, _id: ListenerId) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::immutable_property_of;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn immutable_reports_value_and_never_changes() {
        let prop = immutable_property_of("fixed".to_string());
        assert_eq!(prop.value(), "fixed");
        assert!(!prop.may_change());
        assert!(prop.is_concurrent());
        assert!(prop.check_thread().is_ok());
    }

    #[test]
    fn subscribing_to_immutable_is_noop() {
        let prop = immutable_property_of(1);
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();
        let id = prop.subscribe(ChangeListener::new(move |_: &i32, _: &i32| {
            called_clone.store(true, Ordering::SeqCst);
        }));
        prop.unsubscribe(id);
        assert!(!called.load(Ordering::SeqCst));
    }
}
