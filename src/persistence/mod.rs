//! The `persistence` module saves and restores the delivery database.
//!
//! The running broker never touches disk on the delivery path. Snapshots
//! are taken at shutdown and on the autosave timer, and loaded once at
//! start-up, using `sled` as an embedded key-value store.

pub mod sled_store;

pub use sled_store::{EntryRecord, Persistence, SessionRecord, SnapshotSummary, StoredRecord};

#[cfg(test)]
mod tests;
