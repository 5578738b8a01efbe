//! N-upstream transform over a shared value array.

use std::sync::{Arc, Weak};

use super::{Cache, Route};
use crate::context::Confinement;
use crate::error::{PropertyError, Result};
use crate::notify::{ChangeListener, ListenerId, NotificationCore, Notifier};
use crate::property::{Prop, Property, Value};

/// Upstream values as last delivered, plus the result computed from them.
struct Snapshot<A, T> {
    values: Arc<[A]>,
    result: Arc<T>,
}

/// `transform(&[p.value() for p in upstreams])`.
///
/// While observed, each upstream delivery replaces its own slot of an
/// immutable value array (by compare-and-swap) and the transform runs over
/// the new array.
pub struct MultiMapped<A: Value, T: Value> {
    upstreams: Vec<Prop<A>>,
    transform: Arc<dyn Fn(&[A]) -> T + Send + Sync>,
    confinement: Confinement,
    routes: Vec<Route>,
    notifier: Notifier<T>,
    snapshot: Cache<Snapshot<A, T>>,
    listeners: Vec<ChangeListener<A>>,
}

impl<A: Value, T: Value> MultiMapped<A, T> {
    pub fn new<F>(upstreams: Vec<Prop<A>>, transform: F) -> Result<Arc<Self>>
    where
        F: Fn(&[A]) -> T + Send + Sync + 'static,
    {
        if !upstreams.iter().any(|p| p.may_change()) {
            return Err(PropertyError::immutable("map all"));
        }
        Self::build(upstreams, transform)
    }

    /// Constructor that skips the immutability check: at least one upstream
    /// may change.
    ///
    /// Fails with [`NoExecutor`](PropertyError::NoExecutor) when concurrent
    /// and confined upstreams are mixed and the calling thread has no executor.
    pub(crate) fn build<F>(upstreams: Vec<Prop<A>>, transform: F) -> Result<Arc<Self>>
    where
        F: Fn(&[A]) -> T + Send + Sync + 'static,
    {
        let confinement = Confinement::of_upstreams(upstreams.iter().map(|p| p.is_concurrent()));
        let routes = upstreams
            .iter()
            .map(|p| Route::resolve(&confinement, p.is_concurrent()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Arc::new_cyclic(|me: &Weak<Self>| {
            let listeners = (0..upstreams.len())
                .map(|index| {
                    let me = me.clone();
                    ChangeListener::new(move |_: &A, new: &A| {
                        if let Some(this) = me.upgrade() {
                            this.upstream_changed(index, new);
                        }
                    })
                })
                .collect();
            Self {
                upstreams,
                transform: Arc::new(transform),
                notifier: Notifier::new(&confinement),
                snapshot: Cache::new(&confinement),
                confinement,
                routes,
                listeners,
            }
        }))
    }

    fn current_values(&self) -> Arc<[A]> {
        self.upstreams.iter().map(|p| p.value()).collect()
    }

    fn upstream_changed(&self, index: usize, new: &A) {
        let replaced = self.snapshot.update(|snapshot| {
            let mut values = snapshot.values.to_vec();
            values[index] = new.clone();
            let result = Arc::new((self.transform)(&values));
            Arc::new(Snapshot {
                values: values.into(),
                result,
            })
        });
        if let Some((old, new)) = replaced {
            self.notifier
                .publish(Arc::clone(&old.result), Arc::clone(&new.result), ());
        }
    }

    fn observed_state_changed(&self, observed: bool) {
        if observed {
            let values = self.current_values();
            let result = Arc::new((self.transform)(&values));
            self.snapshot.store(Some(Arc::new(Snapshot { values, result })));
            for ((upstream, route), listener) in self.upstreams.iter().zip(&self.routes).zip(&self.listeners) {
                if upstream.may_change() {
                    route.attach(upstream, listener.clone());
                }
            }
        } else {
            for (upstream, listener) in self.upstreams.iter().zip(&self.listeners) {
                upstream.unsubscribe(listener.id());
            }
            self.snapshot.store(None);
        }
    }
}

impl<A: Value, T: Value> Property<T> for MultiMapped<A, T> {
    fn value(&self) -> T {
        self.confinement.enforce();
        match self.snapshot.load() {
            Some(snapshot) => (*snapshot.result).clone(),
            None => (self.transform)(&self.current_values()),
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
    use crate::property::{concurrent_property_of, confined_property_of, immutable_property_of, MutProp};
    use std::sync::Mutex;

    #[test]
    fn joins_every_upstream() {
        let parts: Vec<MutProp<String>> = ["a", "b", "c"]
            .iter()
            .map(|s| concurrent_property_of(s.to_string()))
            .collect();
        let joined = MultiMapped::new(
            parts.iter().map(|p| p.clone().as_property()).collect(),
            |values: &[String]| values.concat(),
        )
        .unwrap();
        assert_eq!(joined.value(), "abc");

        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        joined.subscribe(ChangeListener::new(move |old: &String, new: &String| {
            log_clone.lock().unwrap().push(format!("{old}->{new}"));
        }));

        parts[1].set("B".into());
        parts[2].set("C".into());
        assert_eq!(*log.lock().unwrap(), vec!["abc->aBc", "aBc->aBC"]);
    }

    #[test]
    fn all_immutable_is_rejected() {
        let result = MultiMapped::new(vec![immutable_property_of(1), immutable_property_of(2)], |v: &[i32]| {
            v.iter().sum::<i32>()
        });
        assert!(matches!(result, Err(PropertyError::Immutable { .. })));
    }

    #[test]
    fn mixed_upstreams_hop_through_the_owner_executor() {
        let mixed = || -> Vec<Prop<i32>> {
            vec![concurrent_property_of(1).as_property(), confined_property_of(2).as_property()]
        };
        let refused = MultiMapped::new(mixed(), |v: &[i32]| v.iter().sum::<i32>());
        assert!(matches!(refused, Err(PropertyError::NoExecutor { .. })));

        let _scope = ExecutorScope::enter(Arc::new(EventLoop::new()));
        let sum = MultiMapped::new(mixed(), |v: &[i32]| v.iter().sum::<i32>()).unwrap();
        assert!(!sum.is_concurrent());
        assert_eq!(sum.value(), 3);
    }
}
