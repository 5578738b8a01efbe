//! Workers compute derived values.
//!
//! A mapped property hands "compute `transform(upstream value)`, then commit
//! it" to a worker as one job. The job may run on any thread; the property
//! decides whether the result is still wanted when it arrives.

use std::sync::Arc;

use super::{Executor, Task};

pub trait Worker: Send + Sync {
    /// Run `job` now or later, on this thread or another.
    fn run(&self, job: Task);

    /// Whether `run` completes the job before returning.
    fn is_in_place(&self) -> bool {
        false
    }
}

/// Computes on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InPlaceWorker;

impl Worker for InPlaceWorker {
    fn run(&self, job: Task) {
        job();
    }

    fn is_in_place(&self) -> bool {
        true
    }
}

/// Computes on an executor, e.g. a background pool.
#[derive(Clone)]
pub struct ExecutorWorker {
    executor: Arc<dyn Executor>,
}

impl ExecutorWorker {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

impl Worker for ExecutorWorker {
    fn run(&self, job: Task) {
        self.executor.execute(job);
    }

    fn is_in_place(&self) -> bool {
        self.executor.is_in_place()
    }
}
