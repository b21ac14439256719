//! The Reporter.

use crate::error::ReportError;
use crate::report::OutcomeReport;
use crate::sink::{ReportSink, TracingSink, create_sink};
use infra_core::{ExecutionRecord, PlanOutcome, ReportingConfig};
use std::sync::Arc;

/// Builds outcome reports and hands them to a sink.
#[derive(Clone)]
pub struct Reporter {
    sink: Arc<dyn ReportSink>,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl Reporter {
    pub fn new(sink: Arc<dyn ReportSink>) -> Self {
        Self { sink }
    }

    pub fn from_config(config: &ReportingConfig) -> Result<Self, ReportError> {
        Ok(Self::new(create_sink(config)?))
    }

    /// Build the report and emit it. A sink error is logged, not returned.
    pub async fn report(&self, record: &ExecutionRecord, outcome: PlanOutcome) -> OutcomeReport {
        let report = OutcomeReport::from_record(record, outcome);
        if let Err(e) = self.sink.emit(&report).await {
            tracing::warn!(plan_id = %report.plan_id, error = %e, "Failed to emit outcome report");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{FileSink, MemorySink};
    use async_trait::async_trait;
    use chrono::Utc;
    use infra_core::{Intent, Plan, PlanNode, ReportSinkKind, ResourceState};

    struct FailingSink;

    #[async_trait]
    impl ReportSink for FailingSink {
        async fn emit(&self, _report: &OutcomeReport) -> Result<(), ReportError> {
            Err(ReportError::Sink("disk full".into()))
        }
    }

    fn record() -> ExecutionRecord {
        let plan = Plan::new(
            Intent::new("cache-cluster-1", ResourceState::new().with("scaled_to", 4)),
            vec![PlanNode::new("n1-add_node", "add_node", "1", serde_json::json!({"to": 4}))],
        );
        ExecutionRecord::new(plan, Utc::now())
    }

    #[tokio::test]
    async fn report_reaches_sink() {
        let sink = Arc::new(MemorySink::new());
        let reporter = Reporter::new(sink.clone());
        let report = reporter.report(&record(), PlanOutcome::Succeeded).await;
        let stored = sink.reports();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].report_id, report.report_id);
    }

    #[tokio::test]
    async fn sink_failure_is_swallowed() {
        let reporter = Reporter::new(Arc::new(FailingSink));
        let report = reporter.report(&record(), PlanOutcome::Failed).await;
        assert_eq!(report.outcome, PlanOutcome::Failed);
    }

    #[tokio::test]
    async fn file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("outcomes.jsonl");
        let reporter = Reporter::new(Arc::new(FileSink::new(&path).unwrap()));
        reporter.report(&record(), PlanOutcome::Succeeded).await;
        reporter.report(&record(), PlanOutcome::Aborted).await;

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<OutcomeReport> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].outcome, PlanOutcome::Aborted);
    }

    #[test]
    fn file_sink_requires_a_path() {
        let config = ReportingConfig {
            sink: ReportSinkKind::File,
            path: None,
        };
        assert!(matches!(
            Reporter::from_config(&config),
            Err(ReportError::Configuration(_))
        ));
    }
}
