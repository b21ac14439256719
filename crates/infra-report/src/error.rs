//! Error types for the report crate.

use thiserror::Error;

/// Errors that can occur while emitting a report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The sink is misconfigured.
    #[error("invalid report sink configuration: {0}")]
    Configuration(String),

    /// The sink could not accept the report.
    #[error("report sink error: {0}")]
    Sink(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
