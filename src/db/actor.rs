use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Work item executed on a [`SerialQueue`].
///
/// The state is `None` only when the worker thread is gone and the job is
/// being drained on the submitting thread instead.
pub(crate) type Job<S> = Box<dyn FnOnce(Option<&mut S>) + Send>;

/// Dedicated thread that owns `S` and runs jobs against it one at a time,
/// in submission order.
pub(crate) struct SerialQueue<S> {
    name: String,
    sender: Option<Sender<Job<S>>>,
    worker: Option<JoinHandle<()>>,
}

impl<S> std::fmt::Debug for SerialQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.name)
            .finish()
    }
}

impl<S: Send + 'static> SerialQueue<S> {
    pub(crate) fn spawn(name: &str, state: S) -> io::Result<Self> {
        let (sender, receiver): (Sender<Job<S>>, Receiver<Job<S>>) = mpsc::channel();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || Self::run(state, receiver))?;
        Ok(Self {
            name: name.to_string(),
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    fn run(mut state: S, receiver: Receiver<Job<S>>) {
        while let Ok(job) = receiver.recv() {
            job(Some(&mut state));
        }
        debug!(
            thread = thread::current().name().unwrap_or("serial_queue"),
            "serial_queue.worker_exit"
        );
    }

    /// Enqueues `job`. If the worker has exited the job runs immediately on
    /// the caller's thread with no state.
    pub(crate) fn submit(&self, job: impl FnOnce(Option<&mut S>) + Send + 'static) {
        let job: Job<S> = Box::new(job);
        let rejected = match &self.sender {
            Some(sender) => sender.send(job).err().map(|err| err.0),
            None => Some(job),
        };
        if let Some(job) = rejected {
            debug!(queue = %self.name, "serial_queue.submit_after_exit");
            job(None);
        }
    }
}

impl<S> Drop for SerialQueue<S> {
    fn drop(&mut self) {
        self.sender = None;
        if let Some(worker) = self.worker.take() {
            // The last handle can be dropped by a job running on the worker
            // itself; joining there would deadlock.
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

/// One-shot rendezvous between a submitting thread and a queued job.
pub(crate) struct Ticket<T> {
    result: Mutex<Option<T>>,
    cv: Condvar,
}

impl<T> Ticket<T> {
    pub(crate) fn new() -> Self {
        Self {
            result: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn finish(&self, value: T) {
        let mut result = self.result.lock();
        if result.is_none() {
            *result = Some(value);
            self.cv.notify_all();
        }
    }

    pub(crate) fn wait(&self) -> T {
        let mut guard = self.result.lock();
        loop {
            if let Some(value) = guard.take() {
                return value;
            }
            self.cv.wait(&mut guard);
        }
    }
}
