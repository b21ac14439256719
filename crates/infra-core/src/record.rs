//! The execution record: durable view of a plan's progress.

use crate::plan::{NodeStatus, Plan, PlanOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Sole source of truth for resuming or auditing a plan, keyed by plan id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub plan_id: Uuid,
    pub intent_id: String,
    pub correlation_id: String,
    pub plan: Plan,
    pub nodes: BTreeMap<String, NodeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PlanOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-node progress as recorded by the executor and rollback coordinator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub status: NodeStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Inputs after output references were resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation_key: Option<String>,
    #[serde(default)]
    pub compensation_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// Fresh record for a plan whose nodes are all pending.
    pub fn new(plan: Plan, at: DateTime<Utc>) -> Self {
        let nodes = plan
            .nodes
            .iter()
            .map(|n| (n.node_id.clone(), NodeRecord::default()))
            .collect();
        Self {
            plan_id: plan.plan_id,
            intent_id: plan.intent.intent_id.clone(),
            correlation_id: plan.intent.correlation_id.clone(),
            plan,
            nodes,
            outcome: None,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn status_of(&self, node_id: &str) -> NodeStatus {
        self.nodes
            .get(node_id)
            .map(|n| n.status)
            .unwrap_or_default()
    }

    /// Output recorded for a succeeded invocation with this idempotency key.
    pub fn succeeded_output(&self, idempotency_key: &str) -> Option<&Value> {
        self.nodes.values().find_map(|n| {
            let same_key = n.idempotency_key.as_deref() == Some(idempotency_key);
            if same_key && n.status == NodeStatus::Succeeded {
                n.output.as_ref()
            } else {
                None
            }
        })
    }

    /// Node ids with the given status, in plan order.
    pub fn nodes_with(&self, status: NodeStatus) -> Vec<String> {
        self.plan
            .nodes
            .iter()
            .filter(|n| self.status_of(&n.node_id) == status)
            .map(|n| n.node_id.clone())
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// The plan with per-node status, attempts and timestamps filled in.
    pub fn plan_with_status(&self) -> Plan {
        let mut plan = self.plan.clone();
        for node in &mut plan.nodes {
            if let Some(rec) = self.nodes.get(&node.node_id) {
                node.status = rec.status;
                node.attempts = rec.attempts;
                node.started_at = rec.started_at;
                node.finished_at = rec.finished_at;
            }
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::Intent;
    use crate::plan::PlanNode;
    use crate::state::ResourceState;

    fn record() -> ExecutionRecord {
        let intent = Intent::new("c1", ResourceState::new().with("scaled_to", 5));
        let plan = Plan::new(
            intent,
            vec![
                PlanNode::new("node-1", "add_node", "1", serde_json::json!({"to": 4})),
                PlanNode::new("node-2", "add_node", "1", serde_json::json!({"to": 5}))
                    .depends_on("node-1"),
            ],
        );
        ExecutionRecord::new(plan, Utc::now())
    }

    #[test]
    fn new_record_starts_pending() {
        let rec = record();
        assert_eq!(rec.status_of("node-1"), NodeStatus::Pending);
        assert_eq!(rec.nodes_with(NodeStatus::Pending), vec!["node-1", "node-2"]);
        assert!(!rec.is_finished());
    }

    #[test]
    fn succeeded_output_matches_key_and_status() {
        let mut rec = record();
        let node = rec.nodes.get_mut("node-1").unwrap();
        node.status = NodeStatus::Running;
        node.idempotency_key = Some("k1".into());
        node.output = Some(serde_json::json!({"node_id": "n4"}));
        assert!(rec.succeeded_output("k1").is_none());

        rec.nodes.get_mut("node-1").unwrap().status = NodeStatus::Succeeded;
        assert_eq!(rec.succeeded_output("k1").unwrap()["node_id"], "n4");
        assert!(rec.succeeded_output("k2").is_none());
    }
}
