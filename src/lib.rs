//! Canopy: a durable, crash-recoverable store for a hierarchical record
//! tree.
//!
//! A [`GraphStore`] keeps one tree of [`Record`]s in a SQLite table. Each
//! update is diffed against the last committed tree so only changed rows are
//! written, all inside a single transaction. A dedicated worker thread owns
//! the database; failed saves rebuild it from scratch and retry a bounded
//! number of times.
//!
//! ```no_run
//! use canopy::{GraphStore, Record, StoreOptions, UpdateMode};
//!
//! # fn main() -> canopy::Result<()> {
//! let store = GraphStore::open("session.db", StoreOptions::default())?;
//! let _ = store.update(
//!     UpdateMode::Sync,
//!     |encoder| {
//!         encoder
//!             .record_mut()
//!             .upsert_child("window", "1")
//!             .replace_data(b"bounds".to_vec());
//!     },
//!     None,
//! );
//! assert!(store.record().is_some());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod db;
pub mod error;
pub mod primitives;
pub mod storage;
pub mod types;

pub use db::{
    Completion, Dispatch, GraphStore, ManualDispatcher, SaveStats, StoreOptions, StoreState,
    StoreStats, Task, ThreadDispatcher, UpdateMode, UpdateStatus,
};
pub use error::{Result, StoreError};
pub use primitives::backend::{Backend, SqliteBackend, Synchronous};
pub use storage::{DeltaEncoder, DiffKind, DiffStep, Record};
pub use types::{Generation, RowId};
