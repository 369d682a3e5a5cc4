use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::actor::{SerialQueue, Ticket};
use super::config::StoreOptions;
use super::dispatch::{Dispatch, ThreadDispatcher};
use super::metrics::StoreStats;
use super::worker::{Shared, StoreState, Worker};
use crate::error::Result;
use crate::primitives::backend::{Backend, SqliteBackend};
use crate::storage::delta::DeltaEncoder;
use crate::Record;

/// Callback told whether a save committed.
pub type Completion = Box<dyn FnOnce(bool) + Send>;

/// How [`GraphStore::update`] schedules its save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Block until the save finishes. Always admitted.
    Sync,
    /// Return immediately. Refused while another save is in flight.
    Async,
}

/// Whether [`GraphStore::update`] took the update.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The update was scheduled, or the store is invalid and its completion
    /// will report `false`.
    Accepted,
    /// An asynchronous update was refused because a save is already in
    /// flight. Nothing was scheduled and the completion was dropped.
    Busy,
}

/// Durable store for a single record tree.
///
/// A dedicated worker thread owns the backend and the authoritative tree.
/// Clients describe changes by mutating a [`DeltaEncoder`]; only the nodes
/// that differ from the last committed tree are written, inside one
/// transaction. Failed saves recreate the backend from scratch and retry,
/// up to [`StoreOptions::max_recovery_attempts`] consecutive failures, after
/// which the store turns [`StoreState::Invalid`] for good.
///
/// Completion and readiness callbacks never run on the caller's stack; they
/// are posted to the store's [`Dispatch`].
pub struct GraphStore<B: Backend = SqliteBackend> {
    pub(super) shared: Arc<Shared>,
    pub(super) queue: SerialQueue<Worker<B>>,
    location: PathBuf,
}

impl GraphStore<SqliteBackend> {
    /// Opens the SQLite database at `path`, delivering callbacks on a
    /// dedicated thread.
    ///
    /// Fails with [`StoreError::Locked`](crate::StoreError::Locked) when
    /// another store holds the database. Loading happens in the background;
    /// see [`GraphStore::when_ready`].
    pub fn open(path: impl Into<PathBuf>, options: StoreOptions) -> Result<Self> {
        let backend = SqliteBackend::new(path)
            .with_synchronous(options.synchronous)
            .with_busy_timeout(options.busy_timeout);
        let dispatcher = ThreadDispatcher::spawn(&format!("{}-callbacks", options.worker_name))?;
        Self::with_backend(backend, options, Arc::new(dispatcher))
    }
}

impl<B: Backend> GraphStore<B> {
    /// Builds a store over an arbitrary backend and client dispatcher.
    ///
    /// The backend lock is taken before returning; opening and loading run
    /// as the first job on the worker.
    pub fn with_backend(
        mut backend: B,
        options: StoreOptions,
        dispatcher: Arc<dyn Dispatch>,
    ) -> Result<Self> {
        backend.lock()?;
        let location = backend.location().to_path_buf();
        let shared = Arc::new(Shared::new(dispatcher));
        let worker = Worker::new(backend, options.recovery_limit(), Arc::clone(&shared));
        let queue = SerialQueue::spawn(&options.worker_name, worker)?;

        let loader = Arc::clone(&shared);
        queue.submit(move |worker| match worker {
            Some(worker) => worker.initialize(),
            None => loader.finish_loading(StoreState::Invalid),
        });
        info!(
            db_path = %location.display(),
            worker = %options.worker_name,
            recovery_limit = options.recovery_limit(),
            "graph_store.opened"
        );
        Ok(Self {
            shared,
            queue,
            location,
        })
    }

    /// Applies `mutate` to a copy of the most recently accepted tree and
    /// persists the result.
    ///
    /// `mutate` runs synchronously on the calling thread and must not call
    /// back into the store. It starts from the tree of the last accepted
    /// update, so changes still queued ahead of it are kept. `completion`, if
    /// given, is always dispatched later with `true` when the save committed.
    ///
    /// Before the initial load finishes a synchronous update waits for it and
    /// an asynchronous one is refused with [`UpdateStatus::Busy`], so neither
    /// starts from an empty tree. Trees deeper than [`Record::MAX_DEPTH`]
    /// are not saved and complete with `false`.
    pub fn update<F>(
        &self,
        mode: UpdateMode,
        mutate: F,
        completion: Option<Completion>,
    ) -> UpdateStatus
    where
        F: FnOnce(&mut DeltaEncoder),
    {
        if self.shared.state() == StoreState::Initializing {
            if mode == UpdateMode::Async {
                debug!("graph_store.update.busy_loading");
                return UpdateStatus::Busy;
            }
            self.flush();
        }
        if self.shared.state() == StoreState::Invalid {
            debug!(mode = ?mode, "graph_store.update.rejected_invalid");
            if let Some(completion) = completion {
                self.shared.dispatch(move || completion(false));
            }
            return UpdateStatus::Accepted;
        }
        match mode {
            UpdateMode::Async => {
                if self
                    .shared
                    .in_flight
                    .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    debug!("graph_store.update.busy");
                    return UpdateStatus::Busy;
                }
            }
            UpdateMode::Sync => {
                self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
            }
        }

        let mut accepted = self.shared.accepted();
        let mut encoder = DeltaEncoder::new(accepted.clone());
        mutate(&mut encoder);
        if encoder.record().depth() > Record::MAX_DEPTH {
            drop(accepted);
            warn!(limit = Record::MAX_DEPTH, "graph_store.update.too_deep");
            self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            if let Some(completion) = completion {
                self.shared.dispatch(move || completion(false));
            }
            return UpdateStatus::Accepted;
        }
        *accepted = Some(Arc::new(encoder.record().clone()));

        let ticket = (mode == UpdateMode::Sync).then(|| Arc::new(Ticket::new()));
        let done = ticket.clone();
        let shared = Arc::clone(&self.shared);
        self.queue.submit(move |worker| {
            let saved = worker.map_or(false, |worker| worker.save(encoder));
            shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            if let Some(completion) = completion {
                shared.dispatch(move || completion(saved));
            }
            if let Some(done) = done {
                done.finish(saved);
            }
        });
        drop(accepted);
        if let Some(ticket) = ticket {
            ticket.wait();
        }
        UpdateStatus::Accepted
    }

    /// Permanently invalidates the store and releases its backend once the
    /// work queued before this call has run.
    pub fn invalidate(&self) {
        info!(db_path = %self.location.display(), "graph_store.invalidate_requested");
        let shared = Arc::clone(&self.shared);
        self.queue.submit(move |worker| match worker {
            Some(worker) => worker.invalidate(),
            None => shared.mark_invalid(),
        });
    }

    /// Runs `callback` on the dispatcher once the initial load has finished,
    /// whether it succeeded or not.
    pub fn when_ready(&self, callback: impl FnOnce() + Send + 'static) {
        self.shared.when_ready(Box::new(callback));
    }

    /// Blocks until every job queued before this call has run on the worker.
    pub fn flush(&self) {
        let ticket = Arc::new(Ticket::new());
        let done = Arc::clone(&ticket);
        self.queue.submit(move |_| done.finish(()));
        ticket.wait();
    }

    /// Location of the backing storage.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// The last committed tree, or `None` before anything was loaded or
    /// saved.
    pub fn record(&self) -> Option<Arc<Record>> {
        self.shared.snapshot()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StoreState {
        self.shared.state()
    }

    /// Returns false once the store is invalid.
    pub fn is_valid(&self) -> bool {
        self.state() != StoreState::Invalid
    }

    /// Lifetime save and recovery counters.
    pub fn stats(&self) -> StoreStats {
        self.shared.counters.snapshot()
    }
}

impl<B: Backend> fmt::Debug for GraphStore<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphStore")
            .field("location", &self.location)
            .field("state", &self.state())
            .field("in_flight", &self.shared.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}
