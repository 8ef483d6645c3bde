//! The durable task store (spec.md §4.1): tasks, user counters, and
//! the message log, backed by an embedded SQLite database with ACID
//! single-row writes.

pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::{StatusUpdate, TaskStore, UpdateOutcome};
