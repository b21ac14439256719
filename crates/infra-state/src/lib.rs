//! # infra-state
//!
//! The State Tracker: the only mutation path for plan and node status.
//!
//! Every change is appended to a durable journal *before* the caller
//! proceeds (write-ahead), and a plan's [`ExecutionRecord`] is rebuilt by
//! replaying its journal. This is what lets a restarted executor skip nodes
//! that already succeeded.
//!
//! ## Journal entries
//!
//! | Entry | Written by |
//! |-------|------------|
//! | `plan_created` | agent, when an intent is accepted |
//! | `node_updated` | executor and rollback coordinator |
//! | `plan_finished` | agent, after execution and rollback |
//!
//! ## Backends
//!
//! - [`MemoryStore`]: process memory, for tests and ephemeral agents
//! - [`FileStore`]: one JSON-lines file per plan, fsynced on every append
//! - [`RedbStore`]: embedded redb database keyed by plan id and sequence
//!
//! [`ExecutionRecord`]: infra_core::ExecutionRecord

pub mod error;
pub mod file;
pub mod journal;
pub mod redb_store;
pub mod store;
pub mod tracker;

pub use error::StateError;
pub use file::FileStore;
pub use journal::{EntryKind, JournalEntry, NodeUpdate};
pub use redb_store::RedbStore;
pub use store::{MemoryStore, StateStore, create_store};
pub use tracker::StateTracker;
