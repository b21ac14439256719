//! Journal storage in an embedded redb database.
//!
//! A single `JOURNAL` table uses a 24-byte composite key:
//! ```text
//! [ plan_id: 16 bytes | seq: u64 big-endian (8 bytes) ]
//! ```
//!
//! All entries of a plan are contiguous and in sequence order, so loading a
//! plan is one range scan.

use crate::error::StateError;
use crate::journal::JournalEntry;
use crate::store::StateStore;
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Key: plan id ++ seq. Value: JSON-encoded [`JournalEntry`].
const JOURNAL: TableDefinition<&[u8], &[u8]> = TableDefinition::new("journal");

fn entry_key(plan_id: Uuid, seq: u64) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..16].copy_from_slice(plan_id.as_bytes());
    key[16..].copy_from_slice(&seq.to_be_bytes());
    key
}

fn persistence(e: impl std::fmt::Display) -> StateError {
    StateError::Persistence(e.to_string())
}

/// Durable store backed by a single redb file.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(persistence)?;
        let wt = db.begin_write().map_err(persistence)?;
        wt.open_table(JOURNAL).map_err(persistence)?;
        wt.commit().map_err(persistence)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn insert(&self, entry: &JournalEntry) -> Result<(), StateError> {
        let key = entry_key(entry.plan_id, entry.seq);
        let value = serde_json::to_vec(entry)?;
        let wt = self.db.begin_write().map_err(persistence)?;
        {
            let mut table = wt.open_table(JOURNAL).map_err(persistence)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(persistence)?;
        }
        wt.commit().map_err(persistence)?;
        Ok(())
    }

    fn scan(&self, plan_id: Uuid) -> Result<Vec<JournalEntry>, StateError> {
        let lower = entry_key(plan_id, 0);
        let upper = entry_key(plan_id, u64::MAX);
        let rt = self.db.begin_read().map_err(persistence)?;
        let table = rt.open_table(JOURNAL).map_err(persistence)?;

        let mut entries = Vec::new();
        for row in table
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(persistence)?
        {
            let (_, v) = row.map_err(persistence)?;
            entries.push(serde_json::from_slice(v.value())?);
        }
        Ok(entries)
    }

    fn all_plan_ids(&self) -> Result<Vec<Uuid>, StateError> {
        let rt = self.db.begin_read().map_err(persistence)?;
        let table = rt.open_table(JOURNAL).map_err(persistence)?;

        let mut ids = BTreeSet::new();
        for row in table.iter().map_err(persistence)? {
            let (k, _) = row.map_err(persistence)?;
            let key = k.value();
            if key.len() == 24 {
                let bytes: [u8; 16] = key[..16].try_into().map_err(persistence)?;
                ids.insert(Uuid::from_bytes(bytes));
            }
        }
        Ok(ids.into_iter().collect())
    }
}

fn join_error(e: tokio::task::JoinError) -> StateError {
    StateError::Persistence(format!("journal task failed: {e}"))
}

#[async_trait]
impl StateStore for RedbStore {
    async fn append(&self, entry: &JournalEntry) -> Result<(), StateError> {
        let store = self.clone();
        let entry = entry.clone();
        tokio::task::spawn_blocking(move || store.insert(&entry))
            .await
            .map_err(join_error)?
    }

    async fn load(&self, plan_id: Uuid) -> Result<Vec<JournalEntry>, StateError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.scan(plan_id))
            .await
            .map_err(join_error)?
    }

    async fn plan_ids(&self) -> Result<Vec<Uuid>, StateError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.all_plan_ids())
            .await
            .map_err(join_error)?
    }
}
