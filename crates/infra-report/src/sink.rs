//! Report sinks.

use crate::error::ReportError;
use crate::report::OutcomeReport;
use async_trait::async_trait;
use infra_core::{ReportSinkKind, ReportingConfig};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

/// Destination for outcome reports.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn emit(&self, report: &OutcomeReport) -> Result<(), ReportError>;
}

/// Create a sink based on configuration.
pub fn create_sink(config: &ReportingConfig) -> Result<Arc<dyn ReportSink>, ReportError> {
    match config.sink {
        ReportSinkKind::Tracing => Ok(Arc::new(TracingSink)),
        ReportSinkKind::Console => Ok(Arc::new(ConsoleSink)),
        ReportSinkKind::Null => Ok(Arc::new(NullSink)),
        ReportSinkKind::File => {
            let path = config.path.as_deref().ok_or_else(|| {
                ReportError::Configuration("reporting.path is required for the file sink".into())
            })?;
            Ok(Arc::new(FileSink::new(path)?))
        }
    }
}

/// Emits one structured `info` event per report.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl ReportSink for TracingSink {
    async fn emit(&self, report: &OutcomeReport) -> Result<(), ReportError> {
        let nodes = serde_json::to_string(&report.nodes)?;
        tracing::info!(
            plan_id = %report.plan_id,
            intent_id = %report.intent_id,
            correlation_id = %report.correlation_id,
            target = %report.target,
            outcome = %report.outcome,
            uncompensated = ?report.uncompensated,
            manual_intervention = ?report.manual_intervention,
            nodes = %nodes,
            "Plan outcome"
        );
        Ok(())
    }
}

/// Prints one JSON line per report to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

#[async_trait]
impl ReportSink for ConsoleSink {
    async fn emit(&self, report: &OutcomeReport) -> Result<(), ReportError> {
        let json = serde_json::to_string(report)?;
        println!("{json}");
        Ok(())
    }
}

/// Appends JSON Lines to a file.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    // Serializes appends from concurrent plans.
    write_lock: Mutex<()>,
}

impl FileSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ReportError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReportSink for FileSink {
    async fn emit(&self, report: &OutcomeReport) -> Result<(), ReportError> {
        let json = serde_json::to_string(report)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| ReportError::Sink(format!("failed to acquire file lock: {e}")))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{json}")?;
        Ok(())
    }
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl ReportSink for NullSink {
    async fn emit(&self, _report: &OutcomeReport) -> Result<(), ReportError> {
        Ok(())
    }
}

/// Keeps reports in memory for inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: RwLock<Vec<OutcomeReport>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<OutcomeReport> {
        self.reports
            .read()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReportSink for MemorySink {
    async fn emit(&self, report: &OutcomeReport) -> Result<(), ReportError> {
        self.reports
            .write()
            .map_err(|e| ReportError::Sink(format!("failed to acquire write lock: {e}")))?
            .push(report.clone());
        Ok(())
    }
}
