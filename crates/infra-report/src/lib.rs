//! # infra-report
//!
//! The Reporter turns a finished [`ExecutionRecord`] into a flat
//! [`OutcomeReport`] and hands it to a [`ReportSink`].
//!
//! A report names every node with its status, attempts and timestamps, and
//! lists separately the nodes rollback could not undo:
//!
//! | List | Meaning |
//! |------|---------|
//! | `uncompensated` | succeeded, but the action declares no compensation |
//! | `manual_intervention` | compensation exhausted its retries |
//!
//! ## Sinks
//!
//! | Sink | Output |
//! |------|--------|
//! | `tracing` | one structured `info` event (default) |
//! | `console` | one JSON line on stdout |
//! | `file` | JSON Lines appended to a file |
//! | `null` | discarded |
//!
//! Sink failures are logged and swallowed; reporting never changes a
//! plan's outcome.
//!
//! [`ExecutionRecord`]: infra_core::ExecutionRecord

pub mod error;
pub mod report;
pub mod reporter;
pub mod sink;

pub use error::ReportError;
pub use report::{NodeReport, OutcomeReport};
pub use reporter::Reporter;
pub use sink::{ConsoleSink, FileSink, MemorySink, NullSink, ReportSink, TracingSink, create_sink};
