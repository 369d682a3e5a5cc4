use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors produced by the store, its backend, and the tree transformer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The SQLite engine reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// I/O error while touching the database or lock files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Another process or store instance holds the database lock.
    #[error("database is locked: {0}")]
    Locked(PathBuf),
    /// Stored rows do not describe a single rooted tree.
    #[error("malformed tree: {0}")]
    Structure(String),
    /// An internal invariant of the diff or save pipeline was broken.
    #[error("contract violation: {0}")]
    Contract(&'static str),
    /// The backend was used while closed.
    #[error("backend is closed")]
    Closed,
    /// The store was invalidated and no longer accepts work.
    #[error("store is invalid")]
    Invalid,
}

impl StoreError {
    /// Returns true when the recovery policy may retry after this error.
    ///
    /// Contract violations indicate a bug in the diffing layer and are never
    /// retried; an invalid store stays invalid.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StoreError::Contract(_) | StoreError::Invalid)
    }

    pub(crate) fn structure(message: impl Into<String>) -> Self {
        StoreError::Structure(message.into())
    }
}
