//! The graph store: a single-writer actor persisting one record tree.

mod actor;
mod config;
mod dispatch;
mod metrics;
mod recovery;
mod store;
mod worker;


pub use config::StoreOptions;
pub use dispatch::{Dispatch, ManualDispatcher, Task, ThreadDispatcher};
pub use metrics::{SaveStats, StoreStats};
pub use store::{Completion, GraphStore, UpdateMode, UpdateStatus};
pub use worker::StoreState;
