use std::time::Duration;

use crate::primitives::backend::Synchronous;

/// Tuning knobs for a [`GraphStore`](super::GraphStore).
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Consecutive failed saves or loads after which the store gives up and
    /// becomes invalid.
    pub max_recovery_attempts: u32,
    /// SQLite durability mode.
    pub synchronous: Synchronous,
    /// How long SQLite waits on a busy database before failing.
    pub busy_timeout: Duration,
    /// Name of the worker thread that owns the backend.
    pub worker_name: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_recovery_attempts: 3,
            synchronous: Synchronous::Full,
            busy_timeout: Duration::from_secs(5),
            worker_name: "canopy-graph-store".to_string(),
        }
    }
}

impl StoreOptions {
    /// Full fsync on every commit.
    pub fn durable() -> Self {
        Self::default()
    }

    /// Sync at checkpoints only.
    pub fn balanced() -> Self {
        Self {
            synchronous: Synchronous::Normal,
            busy_timeout: Duration::from_secs(1),
            ..Self::default()
        }
    }

    /// No fsync; for tests and throwaway stores.
    pub fn ephemeral() -> Self {
        Self {
            synchronous: Synchronous::Off,
            busy_timeout: Duration::from_millis(100),
            ..Self::default()
        }
    }

    pub(crate) fn recovery_limit(&self) -> u32 {
        self.max_recovery_attempts.max(1)
    }
}
