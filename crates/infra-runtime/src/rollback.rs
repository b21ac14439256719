//! The Rollback Coordinator.
//!
//! Compensates succeeded nodes one at a time in reverse plan order. Plan
//! order is topological, so every dependent is compensated (or given up on)
//! before the nodes it depends on.

use crate::action::InvocationContext;
use crate::error::ExecutionError;
use crate::idempotency::derive_compensation_key;
use crate::registry::ActionRegistry;
use crate::retry::RetryPolicy;
use infra_core::{NodeStatus, PlanNode, TargetResource};
use infra_state::{NodeUpdate, StateTracker};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// What rollback did, by node id in the order nodes were visited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackSummary {
    pub compensated: Vec<String>,
    pub uncompensated: Vec<String>,
    pub manual_intervention: Vec<String>,
}

impl RollbackSummary {
    pub fn is_clean(&self) -> bool {
        self.uncompensated.is_empty() && self.manual_intervention.is_empty()
    }
}

#[derive(Clone)]
pub struct RollbackCoordinator {
    registry: Arc<ActionRegistry>,
    tracker: Arc<StateTracker>,
    retry: RetryPolicy,
    default_timeout: Duration,
}

impl RollbackCoordinator {
    pub fn new(
        registry: Arc<ActionRegistry>,
        tracker: Arc<StateTracker>,
        retry: RetryPolicy,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            tracker,
            retry,
            default_timeout,
        }
    }

    /// Compensate every succeeded node of the plan. Nodes left in
    /// `compensating` by an interrupted rollback are picked up again.
    ///
    /// Only a State Tracker failure is returned as an error; compensation
    /// failures end up in the summary.
    pub async fn compensate(&self, plan_id: Uuid) -> Result<RollbackSummary, ExecutionError> {
        let record = self.tracker.snapshot(plan_id).await?;
        let target = record.plan.intent.target.clone();
        let mut summary = RollbackSummary::default();

        for node in record.plan.nodes.iter().rev() {
            let Some(rec) = record.nodes.get(&node.node_id) else {
                continue;
            };
            if !matches!(rec.status, NodeStatus::Succeeded | NodeStatus::Compensating) {
                continue;
            }
            let inputs = rec.inputs.clone().unwrap_or_else(|| node.inputs.clone());
            let outputs = rec.output.clone().unwrap_or(Value::Null);
            let forward_key = rec.idempotency_key.clone().unwrap_or_default();

            let status = self
                .compensate_node(
                    plan_id,
                    &target,
                    node,
                    rec.status,
                    rec.compensation_attempts,
                    &forward_key,
                    &inputs,
                    &outputs,
                )
                .await?;
            match status {
                NodeStatus::Compensated => summary.compensated.push(node.node_id.clone()),
                NodeStatus::Uncompensated => summary.uncompensated.push(node.node_id.clone()),
                _ => summary.manual_intervention.push(node.node_id.clone()),
            }
        }

        tracing::info!(
            %plan_id,
            compensated = summary.compensated.len(),
            uncompensated = summary.uncompensated.len(),
            manual_intervention = summary.manual_intervention.len(),
            "Rollback finished"
        );
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn compensate_node(
        &self,
        plan_id: Uuid,
        target: &TargetResource,
        node: &PlanNode,
        current: NodeStatus,
        prior_attempts: u32,
        forward_key: &str,
        inputs: &Value,
        outputs: &Value,
    ) -> Result<NodeStatus, ExecutionError> {
        let node_id = node.node_id.as_str();
        let compensation = match self.registry.resolve(&node.action, Some(&node.version)) {
            Ok(action) => action.definition().compensation.clone(),
            Err(_) => None,
        };

        let Some(compensation) = compensation else {
            if current == NodeStatus::Succeeded {
                self.tracker
                    .record(plan_id, NodeUpdate::new(node_id, NodeStatus::Uncompensated))
                    .await?;
                let warning = ExecutionError::UncompensatedFailure(node_id.to_string());
                tracing::warn!(%plan_id, node_id, action = %node.action, "{warning}");
                return Ok(NodeStatus::Uncompensated);
            }
            return self
                .give_up(plan_id, node_id, prior_attempts, "compensation is no longer registered")
                .await;
        };

        let key = derive_compensation_key(plan_id, &compensation, forward_key);
        let action = match self.registry.resolve(&compensation, None) {
            Ok(action) => action,
            Err(e) => {
                self.tracker
                    .record(
                        plan_id,
                        NodeUpdate::new(node_id, NodeStatus::Compensating)
                            .attempts(prior_attempts + 1)
                            .key(&key),
                    )
                    .await?;
                return self
                    .give_up(plan_id, node_id, prior_attempts + 1, &e.to_string())
                    .await;
            }
        };
        let def = action.definition();
        let timeout = def
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        let max_attempts = if def.retryable {
            self.retry.max_attempts()
        } else {
            1
        };

        let mut attempt = prior_attempts;
        loop {
            attempt += 1;
            let attempts_this_run = attempt - prior_attempts;
            self.tracker
                .record(
                    plan_id,
                    NodeUpdate::new(node_id, NodeStatus::Compensating)
                        .attempts(attempt)
                        .key(&key),
                )
                .await?;

            let ctx = InvocationContext {
                plan_id,
                node_id: node_id.to_string(),
                target: target.clone(),
                idempotency_key: key.clone(),
                attempt,
            };
            tracing::debug!(%plan_id, node_id, action = %def.name, attempt, "Compensating node");

            let error = match tokio::time::timeout(timeout, action.compensate(&ctx, inputs, outputs)).await {
                Ok(Ok(_)) => {
                    self.tracker
                        .record(
                            plan_id,
                            NodeUpdate::new(node_id, NodeStatus::Compensated).attempts(attempt),
                        )
                        .await?;
                    tracing::info!(%plan_id, node_id, action = %def.name, attempt, "Node compensated");
                    return Ok(NodeStatus::Compensated);
                }
                Ok(Err(source)) => ExecutionError::ActionInvocation {
                    node_id: node_id.to_string(),
                    action: def.name.clone(),
                    source,
                },
                Err(_) => ExecutionError::ActionTimeout {
                    node_id: node_id.to_string(),
                    action: def.name.clone(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                },
            };

            if !error.is_retryable() || attempts_this_run >= max_attempts {
                return self
                    .give_up(plan_id, node_id, attempt, &error.to_string())
                    .await;
            }
            let delay = self.retry.backoff(attempts_this_run - 1);
            tracing::warn!(
                %plan_id,
                node_id,
                action = %def.name,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying compensation"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn give_up(
        &self,
        plan_id: Uuid,
        node_id: &str,
        attempt: u32,
        reason: &str,
    ) -> Result<NodeStatus, ExecutionError> {
        let escalation = ExecutionError::ManualInterventionRequired {
            node_id: node_id.to_string(),
            reason: reason.to_string(),
        };
        self.tracker
            .record(
                plan_id,
                NodeUpdate::new(node_id, NodeStatus::ManualInterventionRequired)
                    .attempts(attempt)
                    .error(escalation.to_string()),
            )
            .await?;
        tracing::error!(%plan_id, node_id, attempt, "{escalation}");
        Ok(NodeStatus::ManualInterventionRequired)
    }
}
