//! Execution journal storage configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackend,

    /// Directory (file backend) or database file (redb backend).
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

/// Storage backend for the execution journal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Process memory; lost on restart.
    #[default]
    Memory,
    /// One JSON-lines journal per plan inside `path`.
    File,
    /// Embedded redb database at `path`.
    Redb,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::default(),
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("data/state")
}
