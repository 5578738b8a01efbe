//! Diffs computed from an upstream's `(old, new)` pairs.

use std::sync::{Arc, Weak};

use super::DiffProperty;
use crate::context::Confinement;
use crate::error::{PropertyError, Result};
use crate::executor::{require_current, Executor, Worker};
use crate::notify::{ChangeListener, Listener, ListenerId, NotificationCore, Notifier};
use crate::property::{Prop, Property, Value};

type Calculate<T, D> = dyn Fn(&T, &T) -> D + Send + Sync;

/// Mirrors `upstream`, delivering `calculate(old, new)` with every change.
///
/// The worker must run jobs in the order it receives them; results are
/// published in that order. A confined property computed off-thread hops
/// each result back through its owner's executor.
pub struct DiffCalculated<T: Value, D> {
    upstream: Prop<T>,
    calculate: Arc<Calculate<T, D>>,
    worker: Arc<dyn Worker>,
    home: Option<Arc<dyn Executor>>,
    confinement: Confinement,
    notifier: Notifier<T, D>,
    on_upstream: ChangeListener<T>,
}

/// Wrap `upstream` so listeners receive `calculate(old, new)` computed by `worker`.
///
/// Fails if `upstream` can never change, or if it is confined, `worker` is
/// not in place and the calling thread has no executor.
pub fn calculate_diff_on<T, D, F>(
    upstream: Prop<T>,
    worker: Arc<dyn Worker>,
    calculate: F,
) -> Result<Arc<DiffCalculated<T, D>>>
where
    T: Value,
    D: Send + Sync + 'static,
    F: Fn(&T, &T) -> D + Send + Sync + 'static,
{
    if !upstream.may_change() {
        return Err(PropertyError::immutable("calculate diff"));
    }
    let home = if upstream.is_concurrent() || worker.is_in_place() {
        None
    } else {
        Some(require_current()?)
    };
    let confinement = Confinement::new(upstream.is_concurrent());

    Ok(Arc::new_cyclic(|me: &Weak<DiffCalculated<T, D>>| {
        let me = me.clone();
        DiffCalculated {
            upstream,
            calculate: Arc::new(calculate),
            worker,
            home,
            notifier: Notifier::new(&confinement),
            confinement,
            on_upstream: ChangeListener::on_arcs(move |old: &Arc<T>, new: &Arc<T>| {
                if let Some(this) = me.upgrade() {
                    this.upstream_changed(Arc::clone(old), Arc::clone(new));
                }
            }),
        }
    }))
}

impl<T: Value, D: Send + Sync + 'static> DiffCalculated<T, D> {
    fn upstream_changed(self: Arc<Self>, old: Arc<T>, new: Arc<T>) {
        let worker = Arc::clone(&self.worker);
        worker.run(Box::new(move || {
            let diff = (self.calculate)(&*old, &*new);
            match self.home.clone() {
                Some(home) => home.execute(Box::new(move || self.notifier.publish(old, new, diff))),
                None => self.notifier.publish(old, new, diff),
            }
        }));
    }

    fn observed_state_changed(&self, observed: bool) {
        if observed {
            self.upstream.subscribe_unconfined(self.on_upstream.clone());
        } else {
            self.upstream.unsubscribe(self.on_upstream.id());
        }
    }
}

impl<T: Value, D: Send + Sync + 'static> Property<T> for DiffCalculated<T, D> {
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
        self.subscribe_diff_unconfined(listener.ignoring_diff())
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.notifier
            .unsubscribe(id, &|observed| self.observed_state_changed(observed));
    }
}

impl<T: Value, D: Send + Sync + 'static> DiffProperty<T, D> for DiffCalculated<T, D> {
    fn subscribe_diff_unconfined(&self, listener: Listener<T, D>) -> ListenerId {
        let id = listener.id();
        self.notifier
            .subscribe(listener, &|observed| self.observed_state_changed(observed));
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{EventLoop, ExecutorScope, ExecutorWorker, InPlaceWorker};
    use crate::property::{concurrent_property_of, confined_property_of, immutable_property_of};
    use std::sync::Mutex;

    fn record(prop: &DiffCalculated<i32, i32>) -> Arc<Mutex<Vec<(i32, i32, i32)>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        prop.subscribe_diff_unconfined(Listener::with_diff(move |old: &i32, new: &i32, diff: &i32| {
            log_clone.lock().unwrap().push((*old, *new, *diff));
        }));
        log
    }

    #[test]
    fn in_place_diffs_arrive_with_each_change() {
        let source = concurrent_property_of(10);
        let deltas =
            calculate_diff_on(source.clone().as_property(), Arc::new(InPlaceWorker), |a: &i32, b: &i32| b - a)
                .unwrap();
        let log = record(&deltas);

        source.set(15);
        source.set(12);
        assert_eq!(*log.lock().unwrap(), vec![(10, 15, 5), (15, 12, -3)]);
    }

    #[test]
    fn worker_diffs_are_published_when_computed() {
        let pool = Arc::new(EventLoop::new());
        let source = concurrent_property_of(0);
        let deltas = calculate_diff_on(
            source.clone().as_property(),
            Arc::new(ExecutorWorker::new(pool.clone())),
            |a: &i32, b: &i32| b - a,
        )
        .unwrap();
        let log = record(&deltas);

        source.set(4);
        source.set(9);
        assert!(log.lock().unwrap().is_empty());

        assert_eq!(pool.run_pending(), 2);
        assert_eq!(*log.lock().unwrap(), vec![(0, 4, 4), (4, 9, 5)]);
    }

    #[test]
    fn last_listener_leaving_detaches_from_upstream() {
        let source = concurrent_property_of(1);
        let deltas =
            calculate_diff_on(source.clone().as_property(), Arc::new(InPlaceWorker), |a: &i32, b: &i32| b - a)
                .unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let id = deltas.subscribe(ChangeListener::new(move |old: &i32, new: &i32| {
            log_clone.lock().unwrap().push((*old, *new));
        }));

        source.set(2);
        deltas.unsubscribe(id);
        source.set(3);

        assert_eq!(*log.lock().unwrap(), vec![(1, 2)]);
        assert_eq!(deltas.value(), 3);
    }

    #[test]
    fn preconditions() {
        let immutable = calculate_diff_on(immutable_property_of(0), Arc::new(InPlaceWorker), |a: &i32, b: &i32| {
            b - a
        });
        assert!(matches!(immutable, Err(PropertyError::Immutable { .. })));

        let pool: Arc<dyn Worker> = Arc::new(ExecutorWorker::new(Arc::new(EventLoop::new())));
        let confined = confined_property_of(0);
        let no_home = calculate_diff_on(confined.clone().as_property(), pool.clone(), |a: &i32, b: &i32| b - a);
        assert!(matches!(no_home, Err(PropertyError::NoExecutor { .. })));

        let _scope = ExecutorScope::enter(Arc::new(EventLoop::new()));
        assert!(calculate_diff_on(confined.as_property(), pool, |a: &i32, b: &i32| b - a).is_ok());
    }
}
