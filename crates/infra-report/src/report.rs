//! Flat outcome records.

use chrono::{DateTime, Utc};
use infra_core::{ExecutionRecord, NodeStatus, PlanOutcome};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to one plan, suitable for a log line or an audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub report_id: Uuid,
    pub plan_id: Uuid,
    pub intent_id: String,
    pub correlation_id: String,
    /// `kind/name` or `name` of the target resource.
    pub target: String,
    pub outcome: PlanOutcome,
    pub nodes: Vec<NodeReport>,
    /// Succeeded nodes whose action declares no compensation.
    pub uncompensated: Vec<String>,
    /// Nodes whose compensation exhausted its retries.
    pub manual_intervention: Vec<String>,
    pub reported_at: DateTime<Utc>,
}

/// One node's line in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node_id: String,
    pub action: String,
    pub status: NodeStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub compensation_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl OutcomeReport {
    /// Build a report from the record, in plan order.
    pub fn from_record(record: &ExecutionRecord, outcome: PlanOutcome) -> Self {
        let nodes: Vec<NodeReport> = record
            .plan
            .nodes
            .iter()
            .map(|node| {
                let rec = record.nodes.get(&node.node_id).cloned().unwrap_or_default();
                NodeReport {
                    node_id: node.node_id.clone(),
                    action: node.action.clone(),
                    status: rec.status,
                    attempts: rec.attempts,
                    compensation_attempts: rec.compensation_attempts,
                    started_at: rec.started_at,
                    finished_at: rec.finished_at,
                    error: rec.error,
                }
            })
            .collect();

        let with_status = |status: NodeStatus| -> Vec<String> {
            nodes
                .iter()
                .filter(|n| n.status == status)
                .map(|n| n.node_id.clone())
                .collect()
        };
        let uncompensated = with_status(NodeStatus::Uncompensated);
        let manual_intervention = with_status(NodeStatus::ManualInterventionRequired);

        Self {
            report_id: Uuid::new_v4(),
            plan_id: record.plan_id,
            intent_id: record.intent_id.clone(),
            correlation_id: record.correlation_id.clone(),
            target: record.plan.intent.target.to_string(),
            outcome,
            nodes,
            uncompensated,
            manual_intervention,
            reported_at: Utc::now(),
        }
    }

    /// Succeeded, or rolled back with nothing left behind.
    pub fn is_clean(&self) -> bool {
        self.uncompensated.is_empty() && self.manual_intervention.is_empty()
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.iter().filter(|n| n.status == status).count()
    }
}
