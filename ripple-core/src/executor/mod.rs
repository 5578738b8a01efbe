//! Executors
//!
//! Properties never spawn threads on their own. When a callback has to run
//! somewhere specific (a listener confined to a UI loop, a mapped value
//! brought back to its owner thread) it is handed to an [`Executor`].
//!
//! # Per-Thread Executors
//!
//! A thread advertises "callbacks for me go through this executor" by
//! entering an [`ExecutorScope`]. Scopes nest; the innermost one wins and
//! is popped when its guard drops.
//!
//! ```rust,ignore
//! let event_loop = Arc::new(EventLoop::new());
//! let _scope = ExecutorScope::enter(event_loop.clone());
//! // properties created here deliver to this thread via `event_loop`
//! ```

mod scheduler;
#[cfg(feature = "tokio")]
mod tokio_backend;
mod worker;

pub use scheduler::{
    shared_scheduler, Cancellable, ScheduledDaemon, Scheduler, SchedulerConfig, TaskHandle,
};
#[cfg(feature = "tokio")]
pub use tokio_backend::{TokioExecutor, TokioScheduler};
pub use worker::{ExecutorWorker, InPlaceWorker, Worker};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::context::describe;
use crate::error::{PropertyError, Result};

/// A task accepted by an executor.
pub type Task = Box<dyn FnOnce() + Send>;

/// Something that runs tasks, now or later, here or elsewhere.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);

    /// Whether `execute` runs the task synchronously on the calling thread.
    fn is_in_place(&self) -> bool {
        false
    }
}

/// Runs every task immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InPlace;

impl Executor for InPlace {
    fn execute(&self, task: Task) {
        task();
    }

    fn is_in_place(&self) -> bool {
        true
    }
}

/// A manually drained task queue.
///
/// Tasks posted from any thread wait until the owning thread calls
/// [`run_pending`](Self::run_pending). This is the shape of a UI event loop.
#[derive(Default)]
pub struct EventLoop {
    queue: Mutex<VecDeque<Task>>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run queued tasks, including ones queued while running. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Lock released before running, tasks may post more tasks.
            let task = self.queue.lock().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Executor for EventLoop {
    fn execute(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending", &self.pending())
            .finish()
    }
}

thread_local! {
    static SCOPE_STACK: RefCell<Vec<Arc<dyn Executor>>> = const { RefCell::new(Vec::new()) };
}

/// Guard registering an executor for the current thread until dropped.
pub struct ExecutorScope {
    depth: usize,
}

impl ExecutorScope {
    /// Make `executor` the current thread's executor.
    #[must_use = "the executor is unregistered when the scope is dropped"]
    pub fn enter(executor: Arc<dyn Executor>) -> Self {
        let depth = SCOPE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(executor);
            stack.len()
        });
        Self { depth }
    }
}

impl Drop for ExecutorScope {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(
                stack.len(),
                self.depth,
                "ExecutorScope dropped out of order"
            );
            stack.pop();
        });
    }
}

/// The executor registered for the calling thread, if any.
pub fn executor_for_current_thread() -> Option<Arc<dyn Executor>> {
    SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Like [`executor_for_current_thread`], failing with [`PropertyError::NoExecutor`].
pub fn require_current() -> Result<Arc<dyn Executor>> {
    executor_for_current_thread().ok_or_else(|| PropertyError::NoExecutor {
        thread: describe(&thread::current()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn in_place_runs_immediately() {
        let ran = Arc::new(AtomicI32::new(0));
        let ran_clone = ran.clone();
        InPlace.execute(Box::new(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn event_loop_runs_tasks_posted_while_draining() {
        let event_loop = Arc::new(EventLoop::new());
        let ran = Arc::new(AtomicI32::new(0));

        let inner_loop = event_loop.clone();
        let ran_clone = ran.clone();
        event_loop.execute(Box::new(move || {
            let ran_inner = ran_clone.clone();
            inner_loop.execute(Box::new(move || {
                ran_inner.fetch_add(1, Ordering::SeqCst);
            }));
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(event_loop.pending(), 1);
        assert_eq!(event_loop.run_pending(), 2);
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn scopes_nest_and_unwind() {
        assert!(executor_for_current_thread().is_none());
        assert!(matches!(
            require_current(),
            Err(PropertyError::NoExecutor { .. })
        ));

        {
            let _outer = ExecutorScope::enter(Arc::new(EventLoop::new()));
            assert!(!executor_for_current_thread().unwrap().is_in_place());
            {
                let _inner = ExecutorScope::enter(Arc::new(InPlace));
                assert!(executor_for_current_thread().unwrap().is_in_place());
            }
            assert!(!executor_for_current_thread().unwrap().is_in_place());
        }

        assert!(executor_for_current_thread().is_none());
    }

    #[test]
    fn scopes_are_per_thread() {
        let _scope = ExecutorScope::enter(Arc::new(InPlace));
        let seen_elsewhere = thread::spawn(|| executor_for_current_thread().is_some())
            .join()
            .unwrap();
        assert!(!seen_elsewhere);
    }
}
