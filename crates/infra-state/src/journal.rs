//! Journal entries and replay into an [`ExecutionRecord`].

use crate::error::StateError;
use chrono::{DateTime, Utc};
use infra_core::{ExecutionRecord, NodeStatus, Plan, PlanOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One durable write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub plan_id: Uuid,
    /// Position in the plan's journal, starting at 0 with `plan_created`.
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum EntryKind {
    PlanCreated { plan: Box<Plan> },
    NodeUpdated(NodeUpdate),
    PlanFinished { outcome: PlanOutcome },
}

/// A status change for one node, with whatever the writer knows at that point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeUpdate {
    pub fn new(node_id: impl Into<String>, status: NodeStatus) -> Self {
        Self {
            node_id: node_id.into(),
            status,
            attempts: None,
            idempotency_key: None,
            inputs: None,
            output: None,
            error: None,
        }
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn key(mut self, idempotency_key: impl Into<String>) -> Self {
        self.idempotency_key = Some(idempotency_key.into());
        self
    }

    pub fn inputs(mut self, inputs: Value) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Fold one entry into the record. `record` is `None` until `plan_created`.
pub fn apply(record: &mut Option<ExecutionRecord>, entry: &JournalEntry) -> Result<(), StateError> {
    let corrupt = |reason: &str| StateError::Corrupt {
        plan_id: entry.plan_id,
        reason: reason.to_string(),
    };

    match &entry.kind {
        EntryKind::PlanCreated { plan } => {
            if record.is_some() {
                return Err(corrupt("duplicate plan_created entry"));
            }
            *record = Some(ExecutionRecord::new((**plan).clone(), entry.at));
        }
        EntryKind::NodeUpdated(update) => {
            let rec = record
                .as_mut()
                .ok_or_else(|| corrupt("node update before plan_created"))?;
            let node = rec
                .nodes
                .get_mut(&update.node_id)
                .ok_or_else(|| corrupt(&format!("update for unknown node {}", update.node_id)))?;

            node.status = update.status;
            if update.status.is_rollback_state() {
                if let Some(key) = &update.idempotency_key {
                    node.compensation_key = Some(key.clone());
                }
                if let Some(attempts) = update.attempts {
                    node.compensation_attempts = attempts;
                }
            } else {
                if let Some(key) = &update.idempotency_key {
                    node.idempotency_key = Some(key.clone());
                }
                if let Some(attempts) = update.attempts {
                    node.attempts = attempts;
                }
                if let Some(inputs) = &update.inputs {
                    node.inputs = Some(inputs.clone());
                }
                if let Some(output) = &update.output {
                    node.output = Some(output.clone());
                }
            }
            if update.error.is_some() {
                node.error = update.error.clone();
            }

            match update.status {
                NodeStatus::Running if node.started_at.is_none() => {
                    node.started_at = Some(entry.at);
                }
                NodeStatus::Succeeded
                | NodeStatus::Failed
                | NodeStatus::Compensated
                | NodeStatus::Uncompensated
                | NodeStatus::ManualInterventionRequired => node.finished_at = Some(entry.at),
                _ => {}
            }
            rec.updated_at = rec.updated_at.max(entry.at);
        }
        EntryKind::PlanFinished { outcome } => {
            let rec = record
                .as_mut()
                .ok_or_else(|| corrupt("plan_finished before plan_created"))?;
            rec.outcome = Some(*outcome);
            rec.updated_at = rec.updated_at.max(entry.at);
        }
    }
    Ok(())
}

/// Rebuild a record from its journal. Entries are applied in `seq` order.
pub fn replay(mut entries: Vec<JournalEntry>) -> Result<Option<ExecutionRecord>, StateError> {
    entries.sort_by_key(|e| e.seq);
    let mut record = None;
    for entry in &entries {
        apply(&mut record, entry)?;
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use infra_core::{Intent, PlanNode, ResourceState};

    fn plan() -> Plan {
        Plan::new(
            Intent::new("c1", ResourceState::new().with("scaled_to", 4)),
            vec![PlanNode::new("n1-add_node", "add_node", "1", serde_json::json!({"to": 4}))],
        )
    }

    fn entry(plan_id: Uuid, seq: u64, kind: EntryKind) -> JournalEntry {
        JournalEntry {
            plan_id,
            seq,
            at: Utc::now(),
            kind,
        }
    }

    #[test]
    fn replay_rebuilds_node_progress() {
        let plan = plan();
        let id = plan.plan_id;
        let entries = vec![
            entry(id, 2, EntryKind::NodeUpdated(
                NodeUpdate::new("n1-add_node", NodeStatus::Succeeded)
                    .attempts(2)
                    .output(serde_json::json!({"node_id": "node-4"})),
            )),
            entry(id, 0, EntryKind::PlanCreated { plan: Box::new(plan) }),
            entry(id, 1, EntryKind::NodeUpdated(
                NodeUpdate::new("n1-add_node", NodeStatus::Running).key("k1").attempts(1),
            )),
        ];

        let record = replay(entries).unwrap().unwrap();
        let node = &record.nodes["n1-add_node"];
        assert_eq!(node.status, NodeStatus::Succeeded);
        assert_eq!(node.attempts, 2);
        assert_eq!(node.idempotency_key.as_deref(), Some("k1"));
        assert!(node.started_at.is_some());
        assert!(node.finished_at.is_some());
        assert_eq!(record.succeeded_output("k1").unwrap()["node_id"], "node-4");
    }

    #[test]
    fn compensation_fields_do_not_overwrite_forward_fields() {
        let plan = plan();
        let id = plan.plan_id;
        let mut record = None;
        apply(&mut record, &entry(id, 0, EntryKind::PlanCreated { plan: Box::new(plan) })).unwrap();
        apply(&mut record, &entry(id, 1, EntryKind::NodeUpdated(
            NodeUpdate::new("n1-add_node", NodeStatus::Running).key("fwd").attempts(1),
        ))).unwrap();
        apply(&mut record, &entry(id, 2, EntryKind::NodeUpdated(
            NodeUpdate::new("n1-add_node", NodeStatus::Succeeded).attempts(1),
        ))).unwrap();
        apply(&mut record, &entry(id, 3, EntryKind::NodeUpdated(
            NodeUpdate::new("n1-add_node", NodeStatus::Compensating).key("comp").attempts(1),
        ))).unwrap();

        let node = &record.unwrap().nodes["n1-add_node"];
        assert_eq!(node.idempotency_key.as_deref(), Some("fwd"));
        assert_eq!(node.compensation_key.as_deref(), Some("comp"));
        assert_eq!(node.attempts, 1);
        assert_eq!(node.compensation_attempts, 1);
    }

    #[test]
    fn update_before_creation_is_corrupt() {
        let id = Uuid::new_v4();
        let entries = vec![entry(id, 0, EntryKind::NodeUpdated(
            NodeUpdate::new("n1", NodeStatus::Running),
        ))];
        assert!(matches!(replay(entries), Err(StateError::Corrupt { .. })));
    }

    #[test]
    fn empty_journal_has_no_record() {
        assert!(replay(Vec::new()).unwrap().is_none());
    }
}
