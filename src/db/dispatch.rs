//! Client execution contexts that completion callbacks are posted to.
//!
//! The store never runs a caller's callback on the caller's stack. Every
//! completion and readiness callback goes through a [`Dispatch`], which runs
//! it later on the client's own context.

use std::collections::VecDeque;
use std::io;

use parking_lot::Mutex;

use super::actor::SerialQueue;

/// Callback posted to a client context.
pub type Task = Box<dyn FnOnce() + Send>;

/// A serial execution context owned by the store's client.
pub trait Dispatch: Send + Sync + 'static {
    /// Schedules `task`. Must not run it before returning.
    fn dispatch(&self, task: Task);
}

/// Runs tasks on a dedicated thread, one at a time, in dispatch order.
#[derive(Debug)]
pub struct ThreadDispatcher {
    queue: SerialQueue<()>,
}

impl ThreadDispatcher {
    /// Spawns the callback thread.
    pub fn spawn(name: &str) -> io::Result<Self> {
        Ok(Self {
            queue: SerialQueue::spawn(name, ())?,
        })
    }
}

impl Dispatch for ThreadDispatcher {
    fn dispatch(&self, task: Task) {
        self.queue.submit(move |_| task());
    }
}

/// Queues tasks until the owning thread drains them, the way a UI run loop
/// services its main queue.
#[derive(Default)]
pub struct ManualDispatcher {
    pending: Mutex<VecDeque<Task>>,
}

impl std::fmt::Debug for ManualDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualDispatcher")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl ManualDispatcher {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Runs queued tasks, including ones they dispatch, until the queue is
    /// empty. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let Some(task) = self.pending.lock().pop_front() else {
                return ran;
            };
            task();
            ran += 1;
        }
    }
}

impl Dispatch for ManualDispatcher {
    fn dispatch(&self, task: Task) {
        self.pending.lock().push_back(task);
    }
}
