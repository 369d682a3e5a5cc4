//! Record storage consumed by the graph store.
//!
//! The store talks to its storage through [`Backend`]: a lockable,
//! single-table record store with row-level SQL and transactions.
//! [`SqliteBackend`] is the production implementation.

use std::path::Path;

use tracing::warn;

use crate::error::Result;
use crate::types::RowId;

mod sqlite;

pub use rusqlite::types::Value;
pub use sqlite::{SqliteBackend, Synchronous};

/// One result row, column values in select order.
pub type Row = Vec<Value>;

/// Lockable record store with row-level CRUD and transactions.
///
/// All methods are called from the store's worker thread only.
pub trait Backend: Send + 'static {
    /// Location of the persisted data.
    fn location(&self) -> &Path;

    /// Opens (creating if needed) the underlying storage.
    fn open(&mut self) -> Result<()>;

    /// Returns true while the storage is open.
    fn is_open(&self) -> bool;

    /// Closes the storage. Safe to call when already closed.
    fn close(&mut self);

    /// Takes the exclusive lock guarding the storage location.
    fn lock(&mut self) -> Result<()>;

    /// Releases the lock taken by [`Backend::lock`].
    fn unlock(&mut self);

    /// Closes the storage and deletes its persisted contents.
    fn unlink(&mut self) -> Result<()>;

    /// Runs a statement and returns the number of rows it changed.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize>;

    /// Runs a query and collects every row.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Row id generated by the most recent successful insert.
    fn last_inserted_id(&self) -> Result<RowId>;

    /// Starts a write transaction.
    fn begin(&mut self) -> Result<()>;

    /// Commits the open transaction.
    fn commit(&mut self) -> Result<()>;

    /// Rolls back the open transaction.
    fn rollback(&mut self) -> Result<()>;

    /// Runs `body` inside a transaction; commits iff it returns `Ok`.
    fn transaction<T, F>(&mut self, body: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.begin()?;
        let outcome = body(self).and_then(|value| self.commit().map(|()| value));
        if outcome.is_err() {
            if let Err(err) = self.rollback() {
                warn!(error = %err, "backend.transaction.rollback_failed");
            }
        }
        outcome
    }
}
