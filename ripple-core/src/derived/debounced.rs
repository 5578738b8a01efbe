//! Delay-and-coalesce.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::Cache;
use crate::context::Confinement;
use crate::error::{PropertyError, Result};
use crate::executor::{require_current, shared_scheduler, Cancellable, Executor, Scheduler};
use crate::notify::{ChangeListener, ListenerId, NotificationCore, Notifier};
use crate::property::{Prop, Property, Value};

/// The delivery waiting for its deadline.
struct Pending<T> {
    /// `old` of the eventual `(old, new)` pair.
    really_old: Arc<T>,
    task: Arc<dyn Cancellable>,
}

/// Publishes an upstream change only after `delay` passes without another one.
///
/// Every upstream change schedules a delivery and tries to cancel the one in
/// flight. If that cancel wins, the swallowed delivery's `old` is carried
/// over, so listeners see `(value before the burst, value after it)`. If the
/// older delivery already started, the newer `old` is used and both pairs
/// reach listeners.
///
/// The upstream subscription lasts as long as this property does. While
/// observed the property keeps itself alive; once it is dropped its
/// upstream listener removes itself on the next delivery.
pub struct Debounced<T: Value> {
    upstream: Prop<T>,
    delay: Duration,
    scheduler: Arc<dyn Scheduler>,
    confinement: Confinement,
    /// Owner executor that confined deliveries hop back to.
    home: Option<Arc<dyn Executor>>,
    notifier: Notifier<T>,
    value: Cache<T>,
    pending: Cache<Pending<T>>,
    keep_alive: Mutex<Option<Arc<Self>>>,
    me: Weak<Self>,
}

impl<T: Value> Debounced<T> {
    /// Debounce on the shared scheduler daemon.
    pub fn new(upstream: Prop<T>, delay: Duration) -> Result<Arc<Self>> {
        Self::with_scheduler(upstream, delay, shared_scheduler()?)
    }

    /// Fails with [`PropertyError::NoExecutor`] for a confined upstream on a
    /// thread without an executor: deliveries fire on the scheduler and need
    /// a way back.
    pub fn with_scheduler(upstream: Prop<T>, delay: Duration, scheduler: Arc<dyn Scheduler>) -> Result<Arc<Self>> {
        if !upstream.may_change() {
            return Err(PropertyError::immutable("debounce"));
        }
        let confinement = Confinement::new(upstream.is_concurrent());
        let home = match confinement {
            Confinement::Concurrent => None,
            Confinement::Confined(_) => Some(require_current()?),
        };
        let value = Cache::new(&confinement);
        value.store(Some(Arc::new(upstream.value())));
        let upstream_listener = ListenerId::new();

        let this = Arc::new_cyclic(|me: &Weak<Self>| Self {
            upstream: Arc::clone(&upstream),
            delay,
            scheduler,
            notifier: Notifier::new(&confinement),
            pending: Cache::new(&confinement),
            confinement,
            home,
            value,
            keep_alive: Mutex::new(None),
            me: me.clone(),
        });

        let me = Arc::downgrade(&this);
        let source = Arc::downgrade(&upstream);
        let listener = ChangeListener::on_arcs(move |old, new| match me.upgrade() {
            Some(this) => this.upstream_changed(old, new),
            None => {
                debug!("debounced property dropped, detaching from upstream");
                if let Some(source) = source.upgrade() {
                    source.unsubscribe(upstream_listener);
                }
            }
        })
        .with_id(upstream_listener);
        upstream.subscribe_unconfined(listener);
        Ok(this)
    }

    fn upstream_changed(&self, old: &Arc<T>, new: &Arc<T>) {
        loop {
            let previous = self.pending.load();
            let really_old = match &previous {
                Some(pending) if !pending.task.is_done() && pending.task.cancel() => {
                    Arc::clone(&pending.really_old)
                }
                _ => Arc::clone(old),
            };

            let me = self.me.clone();
            let (from, to) = (Arc::clone(&really_old), Arc::clone(new));
            let task = self.scheduler.schedule(
                self.delay,
                Box::new(move || {
                    if let Some(this) = me.upgrade() {
                        this.fire(from, to);
                    }
                }),
            );

            let next = Arc::new(Pending {
                really_old,
                task: Arc::clone(&task),
            });
            if self.pending.compare_and_swap(&previous, Some(next)) {
                return;
            }
            // Someone else replaced the pending delivery first.
            task.cancel();
        }
    }

    fn fire(self: Arc<Self>, old: Arc<T>, new: Arc<T>) {
        match self.home.clone() {
            Some(home) => home.execute(Box::new(move || self.commit(old, new))),
            None => self.commit(old, new),
        }
    }

    fn commit(&self, old: Arc<T>, new: Arc<T>) {
        self.value.store(Some(Arc::clone(&new)));
        self.notifier.publish(old, new, ());
    }

    fn observed_state_changed(&self, observed: bool) {
        *self.keep_alive.lock() = if observed { self.me.upgrade() } else { None };
    }
}

impl<T: Value> Property<T> for Debounced<T> {
    fn value(&self) -> T {
        self.confinement.enforce();
        match self.value.load() {
            Some(value) => (*value).clone(),
            None => self.upstream.value(),
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
    use crate::executor::{Task, TaskHandle};
    use crate::property::{concurrent_property_of, confined_property_of};
    use std::sync::Mutex as StdMutex;

    /// Scheduler whose tasks run only when the test says so.
    #[derive(Default)]
    struct ManualScheduler {
        queue: StdMutex<Vec<(Arc<TaskHandle>, Task)>>,
    }

    impl ManualScheduler {
        fn run_all(&self) {
            let tasks: Vec<_> = self.queue.lock().unwrap().drain(..).collect();
            for (handle, task) in tasks {
                handle.run(task);
            }
        }
    }

    impl Scheduler for ManualScheduler {
        fn schedule(&self, _delay: Duration, task: Task) -> Arc<dyn Cancellable> {
            let handle = TaskHandle::new();
            self.queue.lock().unwrap().push((Arc::clone(&handle), task));
            handle
        }
    }

    fn record(prop: &dyn Property<String>) -> Arc<StdMutex<Vec<(String, String)>>> {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let log_clone = log.clone();
        prop.subscribe_unconfined(ChangeListener::new(move |old: &String, new: &String| {
            log_clone.lock().unwrap().push((old.clone(), new.clone()));
        }));
        log
    }

    #[test]
    fn burst_is_coalesced_into_one_pair() {
        let scheduler = Arc::new(ManualScheduler::default());
        let source = concurrent_property_of("a".to_string());
        let debounced =
            Debounced::with_scheduler(source.clone().as_property(), Duration::from_millis(50), scheduler.clone())
                .unwrap();
        let log = record(&*debounced);

        source.set("b".into());
        source.set("c".into());
        source.set("d".into());
        assert_eq!(debounced.value(), "a");

        scheduler.run_all();
        assert_eq!(*log.lock().unwrap(), vec![("a".to_string(), "d".to_string())]);
        assert_eq!(debounced.value(), "d");
    }

    #[test]
    fn started_delivery_keeps_its_pair() {
        let scheduler = Arc::new(ManualScheduler::default());
        let source = concurrent_property_of("a".to_string());
        let debounced =
            Debounced::with_scheduler(source.clone().as_property(), Duration::from_millis(50), scheduler.clone())
                .unwrap();
        let log = record(&*debounced);

        source.set("b".into());
        scheduler.run_all();
        source.set("c".into());
        scheduler.run_all();

        assert_eq!(
            *log.lock().unwrap(),
            vec![("a".to_string(), "b".to_string()), ("b".to_string(), "c".to_string())]
        );
    }

    #[test]
    fn dropped_property_detaches_from_upstream() {
        let scheduler = Arc::new(ManualScheduler::default());
        let source = concurrent_property_of(0);
        let debounced =
            Debounced::with_scheduler(source.clone().as_property(), Duration::from_millis(50), scheduler.clone())
                .unwrap();
        drop(debounced);

        source.set(1);
        source.set(2);
        scheduler.run_all();
        assert!(scheduler.queue.lock().unwrap().is_empty());
    }

    #[test]
    fn confined_debounce_needs_an_executor() {
        let source = confined_property_of(0);
        let result = Debounced::with_scheduler(
            source.as_property(),
            Duration::from_millis(50),
            Arc::new(ManualScheduler::default()),
        );
        assert!(matches!(result, Err(PropertyError::NoExecutor { .. })));
    }
}
