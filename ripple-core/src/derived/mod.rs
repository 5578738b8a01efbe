//! Derived Properties
//!
//! Properties computed from one or more upstream properties. They all follow
//! the same lifecycle:
//!
//! - **Unobserved**: no upstream subscription, no cache. `value()` computes
//!   on demand from the current upstream values.
//! - **Observed**: the first listener triggers the observed-state hook, which
//!   fills the cache and subscribes to every upstream. Upstream changes
//!   recompute, update the cache and publish.
//! - Removing the last listener unsubscribes and drops the cache again.
//!
//! A derived property is concurrent only if all of its upstreams are.
//! Otherwise it is confined to the thread that built it, and deliveries from
//! concurrent upstreams come in through that thread's executor (see
//! [`ExecutorScope`](crate::ExecutorScope)). Building such a property on a
//! thread with no executor fails with
//! [`NoExecutor`](crate::PropertyError::NoExecutor).

mod bimapped;
mod cache;
mod debounced;
mod distinct;
mod flatmapped;
mod mapped;
mod multimapped;
mod periodic;

pub use bimapped::BiMapped;
pub use debounced::Debounced;
pub use distinct::Distinct;
pub use flatmapped::FlatMapped;
pub use mapped::Mapped;
pub use multimapped::MultiMapped;
pub use periodic::Periodic;

pub(crate) use cache::Cache;

use std::sync::Arc;

use tracing::warn;

use crate::context::{Confinement, OwnerToken};
use crate::error::Result;
use crate::executor::{executor_for_current_thread, require_current, Executor};
use crate::notify::{ChangeListener, ListenerId};
use crate::property::{Prop, Value};

/// How deliveries from one upstream reach a receiver.
///
/// Resolved on the receiver's owner thread: a confined receiver fed by a
/// concurrent upstream takes deliveries through the owner thread's executor,
/// everything else is delivered in place.
#[derive(Clone)]
pub(crate) enum Route {
    InPlace,
    Hop(Arc<dyn Executor>),
    /// No executor to hop through; deliveries published off the owner
    /// thread are dropped.
    OwnerOnly(OwnerToken),
}

impl Route {
    /// Fails with [`NoExecutor`](crate::PropertyError::NoExecutor) when a hop
    /// is needed and the calling thread has no executor.
    pub(crate) fn resolve(receiver: &Confinement, upstream_concurrent: bool) -> Result<Self> {
        match receiver.owner() {
            Some(_) if upstream_concurrent => Ok(Self::Hop(require_current()?)),
            _ => Ok(Self::InPlace),
        }
    }

    /// Like [`resolve`](Self::resolve), for upstreams picked after
    /// construction, where there is nobody to report the error to.
    pub(crate) fn resolve_or_guard(receiver: &Confinement, upstream_concurrent: bool) -> Self {
        match receiver.owner() {
            Some(owner) if upstream_concurrent => match executor_for_current_thread() {
                Some(executor) => Self::Hop(executor),
                None => Self::OwnerOnly(owner.clone()),
            },
            _ => Self::InPlace,
        }
    }

    pub(crate) fn attach<T: Value>(&self, upstream: &Prop<T>, listener: ChangeListener<T>) -> ListenerId {
        match self {
            Self::InPlace => upstream.subscribe_unconfined(listener),
            Self::Hop(executor) => upstream.subscribe_on(Arc::clone(executor), listener),
            Self::OwnerOnly(owner) => {
                let id = listener.id();
                let owner = owner.clone();
                let unit = Arc::new(());
                let guarded = ChangeListener::on_arcs(move |old, new| {
                    if owner.is_current() {
                        listener.notify(old, new, &unit);
                    } else {
                        warn!(listener = %id, "dropped a change published off the owner thread");
                    }
                });
                upstream.subscribe_unconfined(guarded.with_id(id))
            }
        }
    }
}
