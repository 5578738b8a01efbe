//! Delayed Tasks
//!
//! Debounced properties hand "deliver this value in 50ms" to a [`Scheduler`]
//! and keep the returned [`Cancellable`] around, so a newer value can try to
//! take the older one's place.
//!
//! # Cancellation Is Best-Effort
//!
//! A task is in one of four states:
//!
//! ```text
//! Scheduled --cancel--> Cancelled
//!     |
//!     +--deadline--> Running --> Done
//! ```
//!
//! `cancel` only wins from `Scheduled`. Once the task has started it runs to
//! completion and `cancel` reports `false`.
//!
//! # The Shared Daemon
//!
//! [`shared_scheduler`] lazily starts one background thread that sleeps on a
//! condition variable until the earliest deadline in its heap.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::Task;
use crate::error::{PropertyError, Result};

/// Handle to a scheduled task.
pub trait Cancellable: Send + Sync {
    /// Prevent the task from running. `true` only if it never will.
    fn cancel(&self) -> bool;

    /// Whether the task has run to completion or was cancelled.
    fn is_done(&self) -> bool;
}

/// Runs tasks after a delay.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: Task) -> Arc<dyn Cancellable>;
}

const SCHEDULED: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;
const DONE: u8 = 3;

/// Lifecycle of one scheduled task, shared between the scheduler and callers.
#[derive(Debug, Default)]
pub struct TaskHandle {
    state: AtomicU8,
}

impl TaskHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the task for running. `false` if it was cancelled first.
    pub fn begin(&self) -> bool {
        self.state
            .compare_exchange(SCHEDULED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish(&self) {
        self.state.store(DONE, Ordering::Release);
    }

    /// Run `task` unless cancelled, marking the handle done afterwards.
    pub fn run(&self, task: Task) {
        if self.begin() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(task));
            self.finish();
            if outcome.is_err() {
                warn!("scheduled task panicked");
            }
        }
    }
}

impl Cancellable for TaskHandle {
    fn cancel(&self) -> bool {
        match self
            .state
            .compare_exchange(SCHEDULED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == CANCELLED,
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.state.load(Ordering::Acquire), CANCELLED | DONE)
    }
}

/// Settings for a [`ScheduledDaemon`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Name of the background thread.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name: "ripple-scheduler".to_string(),
        }
    }
}

struct Entry {
    deadline: Instant,
    seq: u64,
    handle: Arc<TaskHandle>,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed: `BinaryHeap` is a max-heap, we want the earliest deadline on top.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<Entry>,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    wakeup: Condvar,
    seq: AtomicU64,
}

/// A single background thread running tasks at their deadlines.
///
/// Tasks with equal deadlines run in scheduling order.
pub struct ScheduledDaemon {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl ScheduledDaemon {
    pub fn start(config: SchedulerConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            wakeup: Condvar::new(),
            seq: AtomicU64::new(0),
        });
        let worker_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run_daemon(&worker_shared))
            .map_err(|err| PropertyError::SchedulerUnavailable {
                reason: err.to_string(),
            })?;
        debug!(thread = %config.thread_name, "scheduler started");
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Tasks waiting for their deadline, cancelled ones included.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }
}

fn run_daemon(shared: &Shared) {
    loop {
        let entry = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.shutdown {
                    let dropped = queue
                        .heap
                        .drain()
                        .filter(|entry| !entry.handle.is_done())
                        .count();
                    if dropped > 0 {
                        warn!(dropped, "scheduler shut down with pending tasks");
                    }
                    return;
                }
                let next_deadline = queue.heap.peek().map(|entry| entry.deadline);
                match next_deadline {
                    None => shared.wakeup.wait(&mut queue),
                    Some(deadline) if deadline <= Instant::now() => break,
                    Some(deadline) => {
                        shared.wakeup.wait_until(&mut queue, deadline);
                    }
                }
            }
            queue.heap.pop()
        };
        if let Some(Entry { handle, task, .. }) = entry {
            handle.run(task);
        }
    }
}

impl Scheduler for ScheduledDaemon {
    fn schedule(&self, delay: Duration, task: Task) -> Arc<dyn Cancellable> {
        let handle = TaskHandle::new();
        let entry = Entry {
            deadline: Instant::now() + delay,
            seq: self.shared.seq.fetch_add(1, Ordering::Relaxed),
            handle: Arc::clone(&handle),
            task,
        };
        self.shared.queue.lock().heap.push(entry);
        self.shared.wakeup.notify_one();
        handle
    }
}

impl Drop for ScheduledDaemon {
    fn drop(&mut self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.wakeup.notify_one();
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

static SHARED: OnceLock<std::result::Result<Arc<ScheduledDaemon>, PropertyError>> =
    OnceLock::new();

/// The process-wide scheduler, started on first use.
pub fn shared_scheduler() -> Result<Arc<dyn Scheduler>> {
    match SHARED.get_or_init(|| ScheduledDaemon::start(SchedulerConfig::default()).map(Arc::new)) {
        Ok(daemon) => Ok(Arc::clone(daemon) as Arc<dyn Scheduler>),
        Err(err) => Err(err.clone()),
    }
}
