//! Tokio-backed executor and scheduler.
//!
//! Lets an application that already runs a tokio runtime use it for
//! executor-confined listeners and debounce timers instead of the shared
//! daemon thread.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use super::scheduler::{Cancellable, Scheduler, TaskHandle};
use super::{Executor, Task};

/// Spawns each task onto a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor for the runtime the caller is running in.
    ///
    /// Panics outside a runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }
}

/// Schedules delayed tasks with `tokio::time::sleep`.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> Arc<dyn Cancellable> {
        let handle = TaskHandle::new();
        let runner = Arc::clone(&handle);
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            runner.run(task);
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[tokio::test]
    async fn tokio_scheduler_runs_and_cancels() {
        let scheduler = TokioScheduler::new(Handle::current());
        let ran = Arc::new(AtomicI32::new(0));

        let ran_kept = ran.clone();
        scheduler.schedule(
            Duration::from_millis(5),
            Box::new(move || {
                ran_kept.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let ran_cancelled = ran.clone();
        let cancelled = scheduler.schedule(
            Duration::from_millis(5),
            Box::new(move || {
                ran_cancelled.fetch_add(10, Ordering::SeqCst);
            }),
        );
        assert!(cancelled.cancel());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tokio_executor_spawns() {
        let executor = TokioExecutor::current();
        let (tx, rx) = tokio::sync::oneshot::channel();
        executor.execute(Box::new(move || {
            let _ = tx.send(5);
        }));
        assert_eq!(rx.await.unwrap(), 5);
    }
}
