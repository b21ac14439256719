//! Outcome reporting configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportingConfig {
    #[serde(default)]
    pub sink: ReportSinkKind,

    /// Output file for the `file` sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Where outcome reports are delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportSinkKind {
    /// Structured `tracing` event.
    #[default]
    Tracing,
    /// JSON line on stdout.
    Console,
    /// JSON lines appended to `reporting.path`.
    File,
    /// Discard.
    Null,
}
