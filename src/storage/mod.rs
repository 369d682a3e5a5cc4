//! Record trees, their diffing, and their table representation.

/// Diffing a working tree against the last saved one.
pub mod delta;

/// The in-memory record tree.
pub mod record;

/// Table layout, bootstrap and row-level access.
pub mod schema;

/// Rebuilding a record tree from table rows.
pub mod transform;

pub use delta::{DeltaEncoder, DiffKind, DiffStep};
pub use record::Record;
pub use transform::{NodeRow, TableTransformer};
