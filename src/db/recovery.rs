use tracing::{info, warn};

use crate::error::Result;
use crate::primitives::backend::Backend;
use crate::storage::schema;

/// What the store should do after a failed save or load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recovery {
    /// The backend was recreated empty; retry the pending work once.
    Retry,
    /// Stop trying and invalidate the store.
    GiveUp,
}

/// Bounded retry policy for save and load failures.
///
/// Each failure increments a counter and recreates the backend from
/// scratch. Once the counter reaches the limit the store gives up. Only a
/// committed save resets the counter.
#[derive(Debug)]
pub(crate) struct RecoveryPolicy {
    failures: u32,
    limit: u32,
}

impl RecoveryPolicy {
    pub(crate) fn new(limit: u32) -> Self {
        Self { failures: 0, limit }
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    pub(crate) fn reset(&mut self) {
        self.failures = 0;
    }

    /// Records a failure, recreates the backend, and decides whether the
    /// caller may retry.
    pub(crate) fn on_failure<B: Backend>(&mut self, backend: &mut B) -> Recovery {
        self.failures = self.failures.saturating_add(1);
        if let Err(err) = recreate(backend) {
            warn!(
                error = %err,
                failures = self.failures,
                "graph_store.recovery.recreate_failed"
            );
            return Recovery::GiveUp;
        }
        if self.failures >= self.limit {
            warn!(
                failures = self.failures,
                limit = self.limit,
                "graph_store.recovery.exhausted"
            );
            return Recovery::GiveUp;
        }
        Recovery::Retry
    }
}

/// Closes the backend, deletes its contents and reopens an empty schema.
pub(crate) fn recreate<B: Backend>(backend: &mut B) -> Result<()> {
    info!(db_path = %backend.location().display(), "graph_store.recovery.begin");
    backend.close();
    backend.unlink()?;
    backend.open()?;
    schema::initialize(backend)?;
    info!(db_path = %backend.location().display(), "graph_store.recovery.complete");
    Ok(())
}
