//! JSON-lines journal files, one per plan.

use crate::error::StateError;
use crate::journal::JournalEntry;
use crate::store::StateStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Stores each plan's journal in `<dir>/<plan_id>.jsonl`.
///
/// Each append is one write of a newline-terminated line followed by
/// `sync_data`, and appends to the same journal are serialized. A final
/// line that does not parse is treated as a write torn by a crash: reads
/// skip it and the next append cuts it off first. A bad line anywhere else
/// makes the journal corrupt.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    writers: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl FileStore {
    /// Open (creating if needed) the journal directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StateError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            writers: Arc::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn journal_path(&self, plan_id: Uuid) -> PathBuf {
        self.dir.join(format!("{plan_id}.jsonl"))
    }

    fn writer(&self, plan_id: Uuid) -> Result<Arc<tokio::sync::Mutex<()>>, StateError> {
        let mut writers = self
            .writers
            .lock()
            .map_err(|e| StateError::Persistence(format!("journal writer table poisoned: {e}")))?;
        Ok(writers.entry(plan_id).or_default().clone())
    }
}

fn append_line(path: &Path, line: &str) -> Result<(), StateError> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    let end = drop_torn_tail(&mut file, path)?;
    file.seek(SeekFrom::Start(end))?;
    file.write_all(format!("{line}\n").as_bytes())?;
    file.sync_data()?;
    Ok(())
}

/// Cut a trailing partial line off the file and return the new length.
fn drop_torn_tail(file: &mut File, path: &Path) -> Result<u64, StateError> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut contents = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut contents)?;
    let keep = contents
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i as u64 + 1);
    tracing::warn!(path = %path.display(), dropped = len - keep, "Truncating torn journal tail");
    file.set_len(keep)?;
    Ok(keep)
}

fn read_journal(path: &Path, plan_id: Uuid) -> Result<Vec<JournalEntry>, StateError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)?;
    let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut entries = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_str::<JournalEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) if i + 1 == lines.len() => {
                tracing::warn!(%plan_id, error = %e, "Skipping torn final journal line");
            }
            Err(e) => {
                return Err(StateError::Corrupt {
                    plan_id,
                    reason: format!("line {}: {e}", i + 1),
                });
            }
        }
    }
    Ok(entries)
}

fn join_error(e: tokio::task::JoinError) -> StateError {
    StateError::Persistence(format!("journal task failed: {e}"))
}

#[async_trait]
impl StateStore for FileStore {
    async fn append(&self, entry: &JournalEntry) -> Result<(), StateError> {
        let line = serde_json::to_string(entry)?;
        let path = self.journal_path(entry.plan_id);
        let writer = self.writer(entry.plan_id)?;
        let _guard = writer.lock().await;
        tokio::task::spawn_blocking(move || append_line(&path, &line))
            .await
            .map_err(join_error)?
    }

    async fn load(&self, plan_id: Uuid) -> Result<Vec<JournalEntry>, StateError> {
        let path = self.journal_path(plan_id);
        let writer = self.writer(plan_id)?;
        let _guard = writer.lock().await;
        tokio::task::spawn_blocking(move || read_journal(&path, plan_id))
            .await
            .map_err(join_error)?
    }

    async fn plan_ids(&self) -> Result<Vec<Uuid>, StateError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
