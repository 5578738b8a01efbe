//! Time-driven recomputation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::Cache;
use crate::context::Confinement;
use crate::error::Result;
use crate::executor::{shared_scheduler, Cancellable, Scheduler};
use crate::notify::{ChangeListener, ListenerId, NotificationCore, Notifier};
use crate::property::{Property, Value};

/// `compute()`, re-evaluated every `period` while observed.
///
/// Unobserved, every read calls `compute` and nothing is scheduled. The
/// first listener starts the clock; each tick recomputes, publishes when
/// the scheduler fires and books the next tick. The last listener leaving
/// stops it. Always concurrent: ticks run on the scheduler's thread.
pub struct Periodic<T: Value> {
    period: Duration,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    scheduler: Arc<dyn Scheduler>,
    notifier: Notifier<T>,
    cache: Cache<T>,
    /// Bumped on every observed-state change; ticks from an older epoch are void.
    epoch: AtomicU64,
    ticking: Mutex<Option<Arc<dyn Cancellable>>>,
    me: Weak<Self>,
}

impl<T: Value> Periodic<T> {
    /// Tick on the shared scheduler daemon.
    pub fn new<F>(period: Duration, compute: F) -> Result<Arc<Self>>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Ok(Self::with_scheduler(period, shared_scheduler()?, compute))
    }

    pub fn with_scheduler<F>(period: Duration, scheduler: Arc<dyn Scheduler>, compute: F) -> Arc<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let confinement = Confinement::Concurrent;
        Arc::new_cyclic(|me: &Weak<Self>| Self {
            period,
            compute: Box::new(compute),
            scheduler,
            notifier: Notifier::new(&confinement),
            cache: Cache::new(&confinement),
            epoch: AtomicU64::new(0),
            ticking: Mutex::new(None),
            me: me.clone(),
        })
    }

    fn book_tick(&self, epoch: u64) {
        let me = self.me.clone();
        let task = self.scheduler.schedule(
            self.period,
            Box::new(move || {
                if let Some(this) = me.upgrade() {
                    this.tick(epoch);
                }
            }),
        );
        *self.ticking.lock() = Some(task);
    }

    fn tick(&self, epoch: u64) {
        self.notifier.with_locked_transition(|| {
            if self.epoch.load(Ordering::Acquire) != epoch {
                return;
            }
            let next = Arc::new((self.compute)());
            let changed = self.cache.update(|_| Arc::clone(&next));
            // Booked before publishing: a panicking listener must not stop the clock.
            self.book_tick(epoch);
            if let Some((old, new)) = changed {
                self.notifier.publish(old, new, ());
            }
        });
    }

    fn observed_state_changed(&self, observed: bool) {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        if observed {
            self.cache.store(Some(Arc::new((self.compute)())));
            self.book_tick(epoch);
        } else {
            if let Some(task) = self.ticking.lock().take() {
                let cancelled = task.cancel();
                debug!(cancelled, "periodic property stopped ticking");
            }
            self.cache.store(None);
        }
    }
}

impl<T: Value> Property<T> for Periodic<T> {
    fn value(&self) -> T {
        match self.cache.load() {
            Some(value) => (*value).clone(),
            None => (self.compute)(),
        }
    }

    fn may_change(&self) -> bool {
        true
    }

    fn is_concurrent(&self) -> bool {
        true
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
