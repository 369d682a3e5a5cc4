//! Low-level building blocks under the graph store.
//!
//! Includes the storage backend abstraction and inter-process locking.

/// Storage backends the store persists through.
pub mod backend;

/// Exclusive file locks guarding a database location.
pub mod concurrency;
