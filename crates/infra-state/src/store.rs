//! Journal storage backends.

use crate::error::StateError;
use crate::file::FileStore;
use crate::journal::JournalEntry;
use crate::redb_store::RedbStore;
use async_trait::async_trait;
use infra_core::{StateBackend, StateConfig};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Append-only storage for plan journals.
///
/// `append` must not return until the entry is durable for the backend's
/// notion of durability; callers treat an `Ok` as permission to proceed.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Durably append one entry to its plan's journal.
    async fn append(&self, entry: &JournalEntry) -> Result<(), StateError>;

    /// All entries for a plan. Empty if the plan is unknown.
    async fn load(&self, plan_id: Uuid) -> Result<Vec<JournalEntry>, StateError>;

    /// Ids of every plan with at least one entry.
    async fn plan_ids(&self) -> Result<Vec<Uuid>, StateError>;
}

/// Create a store based on configuration.
pub fn create_store(config: &StateConfig) -> Result<Arc<dyn StateStore>, StateError> {
    match config.backend {
        StateBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StateBackend::File => Ok(Arc::new(FileStore::open(&config.path)?)),
        StateBackend::Redb => Ok(Arc::new(RedbStore::open(&config.path)?)),
    }
}

/// In-process store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    journals: RwLock<BTreeMap<Uuid, Vec<JournalEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(e: impl std::fmt::Display) -> StateError {
    StateError::Persistence(format!("memory store lock poisoned: {e}"))
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn append(&self, entry: &JournalEntry) -> Result<(), StateError> {
        let mut journals = self.journals.write().map_err(poisoned)?;
        journals
            .entry(entry.plan_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn load(&self, plan_id: Uuid) -> Result<Vec<JournalEntry>, StateError> {
        let journals = self.journals.read().map_err(poisoned)?;
        Ok(journals.get(&plan_id).cloned().unwrap_or_default())
    }

    async fn plan_ids(&self) -> Result<Vec<Uuid>, StateError> {
        let journals = self.journals.read().map_err(poisoned)?;
        Ok(journals.keys().copied().collect())
    }
}
