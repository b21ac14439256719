//! Plans, plan nodes and their lifecycle statuses.

use crate::intent::Intent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Key marking an input value as a reference to another node's output:
/// `{"$from": "<node id>", "output": "<field>"}`.
pub const OUTPUT_REF_KEY: &str = "$from";

/// An ordered, dependency-aware sequence of action invocations.
///
/// `nodes` is stored in topological order; every `depends_on` entry names a
/// node that appears earlier in the vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: Uuid,
    pub intent: Intent,
    pub nodes: Vec<PlanNode>,
    pub created_at: DateTime<Utc>,
}

/// One action invocation inside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub node_id: String,
    pub action: String,
    pub version: String,
    /// Inputs as planned; may still contain output references.
    pub inputs: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Lifecycle status of a plan node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Compensating,
    Compensated,
    /// Succeeded but no compensating action is declared.
    Uncompensated,
    /// Compensation exhausted its retries.
    ManualInterventionRequired,
}

impl NodeStatus {
    /// Forward-only transition table.
    ///
    /// `Running -> Running` and `Compensating -> Compensating` record a retry,
    /// or a resumed run re-entering a node that was in flight at a crash.
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Succeeded, Compensating)
                | (Succeeded, Uncompensated)
                | (Compensating, Compensating)
                | (Compensating, Compensated)
                | (Compensating, ManualInterventionRequired)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Failed | Self::Compensated | Self::Uncompensated | Self::ManualInterventionRequired
        )
    }

    /// True once rollback has touched the node.
    pub fn is_rollback_state(self) -> bool {
        matches!(
            self,
            Self::Compensating
                | Self::Compensated
                | Self::Uncompensated
                | Self::ManualInterventionRequired
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Compensating => "compensating",
            Self::Compensated => "compensated",
            Self::Uncompensated => "uncompensated",
            Self::ManualInterventionRequired => "manual_intervention_required",
        };
        write!(f, "{}", s)
    }
}

/// Overall result of running a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOutcome {
    Succeeded,
    Failed,
    /// Cancellation stopped scheduling before every node succeeded.
    Cancelled,
    /// The execution journal became unavailable; the run stopped without rollback.
    Aborted,
}

impl PlanOutcome {
    pub fn needs_rollback(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for PlanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

impl PlanNode {
    pub fn new(node_id: impl Into<String>, action: impl Into<String>, version: impl Into<String>, inputs: Value) -> Self {
        Self {
            node_id: node_id.into(),
            action: action.into(),
            version: version.into(),
            inputs,
            depends_on: Vec::new(),
            status: NodeStatus::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn depends_on(mut self, node_id: impl Into<String>) -> Self {
        self.depends_on.push(node_id.into());
        self
    }
}

impl Plan {
    pub fn new(intent: Intent, nodes: Vec<PlanNode>) -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            intent,
            nodes,
            created_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, node_id: &str) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// Action names in node order.
    pub fn actions(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.action.as_str()).collect()
    }

    /// Index-based adjacency: `deps[i]` lists the indices node `i` depends on.
    ///
    /// Unknown dependency ids are ignored.
    pub fn dependency_indices(&self) -> Vec<Vec<usize>> {
        let index: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.node_id.as_str(), i))
            .collect();
        self.nodes
            .iter()
            .map(|n| {
                n.depends_on
                    .iter()
                    .filter_map(|d| index.get(d.as_str()).copied())
                    .collect()
            })
            .collect()
    }

    /// Reverse adjacency: `dependents[i]` lists the indices that depend on node `i`.
    pub fn dependent_indices(&self) -> Vec<Vec<usize>> {
        let mut dependents = vec![Vec::new(); self.nodes.len()];
        for (i, deps) in self.dependency_indices().into_iter().enumerate() {
            for d in deps {
                dependents[d].push(i);
            }
        }
        dependents
    }
}

/// Extract `(node_id, output_field)` when `value` is an output reference.
pub fn as_output_ref(value: &Value) -> Option<(&str, &str)> {
    let obj = value.as_object()?;
    let node = obj.get(OUTPUT_REF_KEY)?.as_str()?;
    let field = obj.get("output")?.as_str()?;
    Some((node, field))
}

/// Build an output reference value.
pub fn output_ref(node_id: &str, field: &str) -> Value {
    serde_json::json!({ OUTPUT_REF_KEY: node_id, "output": field })
}
