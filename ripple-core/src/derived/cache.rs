//! Cached value of a derived property.
//!
//! `None` means "not observed": the property computes on demand instead.

use std::cell::RefCell;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::context::{Confined, Confinement};

pub(crate) enum Cache<X> {
    Concurrent(ArcSwapOption<X>),
    Confined(Confined<RefCell<Option<Arc<X>>>>),
}

fn same<X>(a: &Option<Arc<X>>, b: &Option<Arc<X>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl<X: Send + Sync> Cache<X> {
    pub(crate) fn new(confinement: &Confinement) -> Self {
        match confinement.owner() {
            None => Self::Concurrent(ArcSwapOption::empty()),
            Some(owner) => Self::Confined(Confined::new(owner.clone(), RefCell::new(None))),
        }
    }

    pub(crate) fn load(&self) -> Option<Arc<X>> {
        match self {
            Self::Concurrent(cell) => cell.load_full(),
            Self::Confined(cell) => cell.get().borrow().clone(),
        }
    }

    pub(crate) fn store(&self, value: Option<Arc<X>>) {
        match self {
            Self::Concurrent(cell) => cell.store(value),
            Self::Confined(cell) => *cell.get().borrow_mut() = value,
        }
    }

    pub(crate) fn swap(&self, value: Option<Arc<X>>) -> Option<Arc<X>> {
        match self {
            Self::Concurrent(cell) => cell.swap(value),
            Self::Confined(cell) => cell.get().replace(value),
        }
    }

    /// Install `new` if the cache still holds `current` (by identity).
    pub(crate) fn compare_and_swap(&self, current: &Option<Arc<X>>, new: Option<Arc<X>>) -> bool {
        match self {
            Self::Concurrent(cell) => {
                let prev = cell.compare_and_swap(current, new);
                same(&prev, current)
            }
            Self::Confined(cell) => {
                let mut slot = cell.get().borrow_mut();
                if !same(&slot, current) {
                    return false;
                }
                *slot = new;
                true
            }
        }
    }

    /// Replace a present value with `f(value)`; no-op while empty.
    ///
    /// Returns the replaced and the installed value.
    pub(crate) fn update(&self, f: impl Fn(&Arc<X>) -> Arc<X>) -> Option<(Arc<X>, Arc<X>)> {
        loop {
            let current = self.load()?;
            let next = f(&current);
            if self.compare_and_swap(&Some(Arc::clone(&current)), Some(Arc::clone(&next))) {
                return Some((current, next));
            }
        }
    }
}
