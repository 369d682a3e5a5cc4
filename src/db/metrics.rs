use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Row operations issued by one committed save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveStats {
    /// Rows inserted.
    pub inserted: u64,
    /// Rows rewritten in place.
    pub updated: u64,
    /// Rows deleted.
    pub deleted: u64,
    /// Matched records left untouched.
    pub skipped: u64,
}

impl SaveStats {
    /// Rows actually written.
    pub fn writes(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }
}

/// Lifetime counters of a store, as returned by `GraphStore::stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Saves that committed.
    pub saves_committed: u64,
    /// Failed save attempts, retries included.
    pub save_failures: u64,
    /// Failed load attempts.
    pub load_failures: u64,
    /// Backend recreations attempted.
    pub recoveries: u64,
    /// Rows inserted, summed over every committed save.
    pub rows_inserted: u64,
    /// Rows rewritten in place.
    pub rows_updated: u64,
    /// Rows deleted.
    pub rows_deleted: u64,
    /// Matched records left untouched.
    pub rows_skipped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StoreCounters {
    saves_committed: AtomicU64,
    save_failures: AtomicU64,
    load_failures: AtomicU64,
    recoveries: AtomicU64,
    rows_inserted: AtomicU64,
    rows_updated: AtomicU64,
    rows_deleted: AtomicU64,
    rows_skipped: AtomicU64,
}

impl StoreCounters {
    pub(crate) fn record_commit(&self, stats: &SaveStats) {
        self.saves_committed.fetch_add(1, Ordering::Relaxed);
        self.rows_inserted.fetch_add(stats.inserted, Ordering::Relaxed);
        self.rows_updated.fetch_add(stats.updated, Ordering::Relaxed);
        self.rows_deleted.fetch_add(stats.deleted, Ordering::Relaxed);
        self.rows_skipped.fetch_add(stats.skipped, Ordering::Relaxed);
    }

    pub(crate) fn record_save_failure(&self) {
        self.save_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StoreStats {
        StoreStats {
            saves_committed: self.saves_committed.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            rows_inserted: self.rows_inserted.load(Ordering::Relaxed),
            rows_updated: self.rows_updated.load(Ordering::Relaxed),
            rows_deleted: self.rows_deleted.load(Ordering::Relaxed),
            rows_skipped: self.rows_skipped.load(Ordering::Relaxed),
        }
    }
}
