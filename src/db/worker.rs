use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::dispatch::{Dispatch, Task};
use super::metrics::{SaveStats, StoreCounters};
use super::recovery::{Recovery, RecoveryPolicy};
use crate::error::{Result, StoreError};
use crate::primitives::backend::Backend;
use crate::storage::delta::{DeltaEncoder, DiffStep};
use crate::storage::schema;
use crate::types::{Generation, RowId};
use crate::Record;

/// Lifecycle of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// The initial load has not finished.
    Initializing,
    /// Loaded and accepting updates.
    Ready,
    /// Permanently failed or invalidated; updates complete with `false`.
    Invalid,
}

impl StoreState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StoreState::Initializing,
            1 => StoreState::Ready,
            _ => StoreState::Invalid,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            StoreState::Initializing => 0,
            StoreState::Ready => 1,
            StoreState::Invalid => 2,
        }
    }
}

enum Readiness {
    Loading(Vec<Task>),
    Loaded,
}

/// State readable from both the client context and the worker.
pub(crate) struct Shared {
    state: AtomicU8,
    pub(crate) in_flight: AtomicUsize,
    snapshot: Mutex<Option<Arc<Record>>>,
    accepted: Mutex<Option<Arc<Record>>>,
    readiness: Mutex<Readiness>,
    pub(crate) counters: StoreCounters,
    dispatcher: Arc<dyn Dispatch>,
}

impl Shared {
    pub(crate) fn new(dispatcher: Arc<dyn Dispatch>) -> Self {
        Self {
            state: AtomicU8::new(StoreState::Initializing.as_u8()),
            in_flight: AtomicUsize::new(0),
            snapshot: Mutex::new(None),
            accepted: Mutex::new(None),
            readiness: Mutex::new(Readiness::Loading(Vec::new())),
            counters: StoreCounters::default(),
            dispatcher,
        }
    }

    pub(crate) fn state(&self) -> StoreState {
        StoreState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: StoreState) {
        // Invalid is terminal.
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != StoreState::Invalid.as_u8()).then_some(state.as_u8())
            });
    }

    pub(crate) fn snapshot(&self) -> Option<Arc<Record>> {
        self.snapshot.lock().clone()
    }

    fn publish(&self, record: Option<Arc<Record>>) {
        *self.snapshot.lock() = record;
    }

    /// The tree handed to the worker by the most recent accepted update.
    ///
    /// New encoders start from it, so an update never drops changes that
    /// are still queued ahead of it. Hold the guard until the save job is
    /// submitted to keep queue order and seed order the same.
    pub(crate) fn accepted(&self) -> MutexGuard<'_, Option<Arc<Record>>> {
        self.accepted.lock()
    }

    fn reset_accepted(&self, record: Option<Arc<Record>>) {
        *self.accepted.lock() = record;
    }

    pub(crate) fn dispatch(&self, task: impl FnOnce() + Send + 'static) {
        self.dispatcher.dispatch(Box::new(task));
    }

    /// Runs `callback` once loading has finished, always via the dispatcher.
    pub(crate) fn when_ready(&self, callback: Task) {
        let mut readiness = self.readiness.lock();
        if let Readiness::Loading(waiting) = &mut *readiness {
            waiting.push(callback);
            return;
        }
        drop(readiness);
        self.dispatcher.dispatch(callback);
    }

    pub(crate) fn mark_invalid(&self) {
        self.set_state(StoreState::Invalid);
    }

    pub(crate) fn finish_loading(&self, state: StoreState) {
        let waiting = {
            let mut readiness = self.readiness.lock();
            self.set_state(state);
            match std::mem::replace(&mut *readiness, Readiness::Loaded) {
                Readiness::Loading(waiting) => waiting,
                Readiness::Loaded => Vec::new(),
            }
        };
        for callback in waiting {
            self.dispatcher.dispatch(callback);
        }
    }
}

/// Actor state: the only owner of the backend and the authoritative tree.
pub(crate) struct Worker<B: Backend> {
    backend: Option<B>,
    record: Option<Arc<Record>>,
    recovery: RecoveryPolicy,
    shared: Arc<Shared>,
}

impl<B: Backend> Worker<B> {
    pub(crate) fn new(backend: B, recovery_limit: u32, shared: Arc<Shared>) -> Self {
        Self {
            backend: Some(backend),
            record: None,
            recovery: RecoveryPolicy::new(recovery_limit),
            shared,
        }
    }

    /// Opens the backend and loads the stored tree, recovering as needed.
    pub(crate) fn initialize(&mut self) {
        let state = self.load_with_recovery();
        info!(state = ?state, nodes = self.record.as_ref().map_or(0, |r| r.node_count()), "graph_store.initialized");
        self.shared.finish_loading(state);
    }

    fn load_with_recovery(&mut self) -> StoreState {
        loop {
            let Some(backend) = self.backend.as_mut() else {
                return StoreState::Invalid;
            };
            let loaded = backend.open().and_then(|()| schema::load(backend));
            match loaded {
                Ok(root) => {
                    self.record = root.map(Arc::new);
                    self.shared.publish(self.record.clone());
                    self.shared.reset_accepted(self.record.clone());
                    return StoreState::Ready;
                }
                Err(err) => {
                    self.shared.counters.record_load_failure();
                    warn!(error = %err, failures = self.recovery.failures() + 1, "graph_store.load.failed");
                    if !err.is_recoverable() {
                        self.release("load contract violation");
                        return StoreState::Invalid;
                    }
                    self.shared.counters.record_recovery();
                    if self.recovery.on_failure(backend) == Recovery::GiveUp {
                        self.release("load recovery exhausted");
                        return StoreState::Invalid;
                    }
                }
            }
        }
    }

    /// Persists the encoder's working tree. Returns true once committed.
    pub(crate) fn save(&mut self, mut encoder: DeltaEncoder) -> bool {
        loop {
            let Some(backend) = self.backend.as_mut() else {
                debug!("graph_store.save.skipped_invalid");
                return false;
            };
            // The encoder may have been seeded from a tree that was still
            // queued; diff against what is actually stored.
            encoder.rebase(self.record.clone());
            match apply(backend, &mut encoder) {
                Ok(stats) => {
                    self.recovery.reset();
                    self.shared.counters.record_commit(&stats);
                    let record = Arc::new(encoder.into_record());
                    debug!(
                        inserted = stats.inserted,
                        updated = stats.updated,
                        deleted = stats.deleted,
                        skipped = stats.skipped,
                        nodes = record.node_count(),
                        "graph_store.save.committed"
                    );
                    self.record = Some(Arc::clone(&record));
                    self.shared.publish(Some(record));
                    return true;
                }
                Err(err) if !err.is_recoverable() => {
                    error!(error = %err, "graph_store.save.contract_violation");
                    self.shared.counters.record_save_failure();
                    self.release("save contract violation");
                    return false;
                }
                Err(err) => {
                    self.shared.counters.record_save_failure();
                    warn!(error = %err, failures = self.recovery.failures() + 1, "graph_store.save.failed");
                    self.shared.counters.record_recovery();
                    if self.recovery.on_failure(backend) == Recovery::GiveUp {
                        self.release("save recovery exhausted");
                        return false;
                    }
                    // The backend is empty now: forget the baseline and
                    // insert the whole working tree on the retry.
                    self.record = None;
                    self.shared.publish(None);
                    encoder = DeltaEncoder::fresh(encoder.into_record());
                }
            }
        }
    }

    /// Marks the store invalid and releases the backend.
    pub(crate) fn invalidate(&mut self) {
        self.release("invalidated by caller");
    }

    fn release(&mut self, reason: &'static str) {
        self.shared.set_state(StoreState::Invalid);
        self.shared.reset_accepted(None);
        if let Some(mut backend) = self.backend.take() {
            backend.close();
            backend.unlock();
            info!(
                reason,
                db_path = %backend.location().display(),
                "graph_store.invalidated"
            );
        }
    }
}

/// Runs one save attempt in a single transaction.
///
/// On failure the storage ids handed out to inserted records are cleared
/// again, since the rows they pointed at were rolled back.
fn apply<B: Backend>(backend: &mut B, encoder: &mut DeltaEncoder) -> Result<SaveStats> {
    let mut inserted = HashSet::new();
    let outcome = backend.transaction(|backend| {
        let mut stats = SaveStats::default();
        encoder.enumerate(|step| apply_step(backend, step, &mut inserted, &mut stats))?;
        Ok(stats)
    });
    if outcome.is_err() && !inserted.is_empty() {
        encoder.record_mut().erase_storage_ids_in(&inserted);
    }
    outcome
}

fn apply_step<B: Backend>(
    backend: &mut B,
    step: DiffStep<'_>,
    inserted: &mut HashSet<RowId>,
    stats: &mut SaveStats,
) -> Result<()> {
    match (step.before, step.after) {
        (Some(before), None) => {
            let rowid = before
                .storage_id()
                .ok_or(StoreError::Contract("deleted record has no storage id"))?;
            schema::delete_row(backend, rowid)?;
            stats.deleted += 1;
        }
        (None, Some(after)) => {
            let parent = step
                .parent
                .ok_or(StoreError::Contract("inserted record has no parent row"))?;
            let rowid = schema::insert_row(backend, after, parent)?;
            after.set_storage_id(Some(rowid));
            inserted.insert(rowid);
            stats.inserted += 1;
        }
        (Some(before), Some(after)) => {
            let rowid = before
                .storage_id()
                .ok_or(StoreError::Contract("updated record has no storage id"))?;
            after.set_storage_id(Some(rowid));
            let unchanged = after.generation() != Generation::AlwaysEncode
                && (after.generation().unchanged_since(before.generation())
                    || before.data() == after.data());
            if unchanged {
                stats.skipped += 1;
            } else {
                schema::update_row(backend, rowid, after.data())?;
                stats.updated += 1;
            }
        }
        (None, None) => {}
    }
    Ok(())
}
