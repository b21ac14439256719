//! The Executor.
//!
//! A single scheduler loop owns all bookkeeping for a run. Ready nodes are
//! spawned as tokio tasks, bounded by a semaphore, and report back over an
//! mpsc channel. A node becomes ready only once every dependency is durably
//! succeeded; dependents of a failed node are never started.

use crate::action::InvocationContext;
use crate::error::{ActionError, ExecutionError};
use crate::idempotency::derive_key;
use crate::registry::ActionRegistry;
use crate::retry::RetryPolicy;
use infra_core::{ExecutorConfig, NodeStatus, Plan, PlanNode, PlanOutcome, TargetResource, as_output_ref};
use infra_state::{NodeUpdate, StateError, StateTracker};
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Waiting,
    Running,
    Succeeded,
    Failed,
    /// A dependency failed; never started.
    Blocked,
}

struct NodeJob {
    index: usize,
    plan_id: Uuid,
    node: PlanNode,
    target: TargetResource,
    inputs: Result<Value, String>,
    prior_attempts: u32,
}

enum NodeDone {
    Succeeded(Value),
    Failed,
}

struct NodeResult {
    index: usize,
    result: Result<NodeDone, StateError>,
}

/// Runs plans against the registered actions.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<ActionRegistry>,
    tracker: Arc<StateTracker>,
    max_in_flight: usize,
    default_timeout: Duration,
    retry: RetryPolicy,
}

impl Executor {
    pub fn new(
        registry: Arc<ActionRegistry>,
        tracker: Arc<StateTracker>,
        config: &ExecutorConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            tracker,
            max_in_flight: config.max_in_flight.max(1),
            default_timeout: config.default_timeout(),
            retry,
        }
    }

    /// Run every runnable node of the plan and return the overall outcome.
    ///
    /// Nodes already succeeded in the execution record are not run again. A
    /// record that already has an outcome is returned as is. Persistence
    /// failures yield [`PlanOutcome::Aborted`].
    pub async fn run(&self, plan: &Plan, cancel: &CancellationToken) -> PlanOutcome {
        match self.try_run(plan, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(plan_id = %plan.plan_id, error = %e, "Run aborted");
                PlanOutcome::Aborted
            }
        }
    }

    /// Like [`run`](Self::run) but surfaces the persistence error.
    pub async fn try_run(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<PlanOutcome, ExecutionError> {
        let record = self.tracker.begin(plan).await?;
        if let Some(outcome) = record.outcome {
            tracing::info!(plan_id = %plan.plan_id, %outcome, "Plan already finished");
            return Ok(outcome);
        }
        if record.nodes.values().any(|n| n.status.is_rollback_state()) {
            tracing::info!(plan_id = %plan.plan_id, "Plan is rolling back; skipping execution");
            return Ok(PlanOutcome::Failed);
        }

        let n = plan.len();
        let deps = plan.dependency_indices();
        let dependents = plan.dependent_indices();
        let index: HashMap<&str, usize> = plan
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.node_id.as_str(), i))
            .collect();

        let mut slots = vec![Slot::Waiting; n];
        let mut outputs: Vec<Option<Value>> = vec![None; n];
        let mut prior_attempts = vec![0u32; n];
        for (i, node) in plan.nodes.iter().enumerate() {
            let rec = record.nodes.get(&node.node_id).cloned().unwrap_or_default();
            prior_attempts[i] = rec.attempts;
            match rec.status {
                NodeStatus::Succeeded => {
                    slots[i] = Slot::Succeeded;
                    outputs[i] = Some(rec.output.unwrap_or(Value::Null));
                }
                NodeStatus::Failed => slots[i] = Slot::Failed,
                _ => {}
            }
        }
        let failed: Vec<usize> = (0..n).filter(|i| slots[*i] == Slot::Failed).collect();
        for i in failed {
            block_dependents(i, &dependents, &mut slots);
        }

        let mut unmet: Vec<usize> = deps
            .iter()
            .map(|ds| ds.iter().filter(|d| slots[**d] != Slot::Succeeded).count())
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|i| slots[*i] == Slot::Waiting && unmet[*i] == 0)
            .map(Reverse)
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let (tx, mut rx) = mpsc::channel::<NodeResult>(n.max(1));
        let mut in_flight = 0usize;
        let mut cancelled = false;
        let mut persistence: Option<StateError> = None;

        tracing::info!(plan_id = %plan.plan_id, nodes = n, "Executing plan");

        loop {
            while persistence.is_none() && !cancelled {
                let Some(Reverse(i)) = ready.pop() else {
                    break;
                };
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                if cancel.is_cancelled() {
                    tracing::info!(plan_id = %plan.plan_id, "Cancellation requested; no new nodes will start");
                    cancelled = true;
                    break;
                }

                slots[i] = Slot::Running;
                in_flight += 1;
                let job = NodeJob {
                    index: i,
                    plan_id: plan.plan_id,
                    node: plan.nodes[i].clone(),
                    target: plan.intent.target.clone(),
                    inputs: resolve_inputs(&plan.nodes[i].inputs, &index, &outputs),
                    prior_attempts: prior_attempts[i],
                };
                let worker = self.clone();
                let cancel = cancel.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let index = job.index;
                    let result = worker.run_node(job, &cancel).await;
                    drop(permit);
                    let _ = tx.send(NodeResult { index, result }).await;
                });
            }

            if in_flight == 0 {
                break;
            }
            let Some(done) = rx.recv().await else {
                break;
            };
            in_flight -= 1;

            match done.result {
                Ok(NodeDone::Succeeded(output)) => {
                    slots[done.index] = Slot::Succeeded;
                    outputs[done.index] = Some(output);
                    for &d in &dependents[done.index] {
                        unmet[d] = unmet[d].saturating_sub(1);
                        if unmet[d] == 0 && slots[d] == Slot::Waiting {
                            ready.push(Reverse(d));
                        }
                    }
                }
                Ok(NodeDone::Failed) => {
                    slots[done.index] = Slot::Failed;
                    block_dependents(done.index, &dependents, &mut slots);
                }
                Err(e) => {
                    slots[done.index] = Slot::Failed;
                    if persistence.is_none() {
                        persistence = Some(e);
                    }
                }
            }
        }

        if let Some(e) = persistence {
            return Err(ExecutionError::PersistenceUnavailable(e));
        }

        let any_failed = slots.iter().any(|s| matches!(s, Slot::Failed | Slot::Blocked));
        let all_succeeded = slots.iter().all(|s| *s == Slot::Succeeded);
        let outcome = if any_failed {
            PlanOutcome::Failed
        } else if all_succeeded {
            PlanOutcome::Succeeded
        } else if cancelled {
            PlanOutcome::Cancelled
        } else {
            tracing::warn!(plan_id = %plan.plan_id, "Nodes left unscheduled; dependency graph is inconsistent");
            PlanOutcome::Failed
        };
        tracing::info!(plan_id = %plan.plan_id, %outcome, "Execution finished");
        Ok(outcome)
    }

    async fn run_node(
        &self,
        job: NodeJob,
        cancel: &CancellationToken,
    ) -> Result<NodeDone, StateError> {
        let plan_id = job.plan_id;
        let node_id = job.node.node_id.as_str();

        let action = match self.registry.resolve(&job.node.action, Some(&job.node.version)) {
            Ok(action) => action,
            Err(e) => return self.fail_before_invoke(&job, None, &e.to_string()).await,
        };
        let def = action.definition();
        let inputs = match &job.inputs {
            Ok(inputs) => inputs.clone(),
            Err(reason) => return self.fail_before_invoke(&job, None, reason).await,
        };
        let key = derive_key(plan_id, &def.name, &def.idempotency, &inputs);

        if let Some(output) = self.tracker.succeeded_output(plan_id, &key).await? {
            tracing::info!(%plan_id, node_id, action = %def.name, "Idempotency key already succeeded; reusing output");
            self.tracker
                .record(
                    plan_id,
                    NodeUpdate::new(node_id, NodeStatus::Running)
                        .attempts(job.prior_attempts)
                        .key(&key)
                        .inputs(inputs.clone()),
                )
                .await?;
            self.tracker
                .record(
                    plan_id,
                    NodeUpdate::new(node_id, NodeStatus::Succeeded).output(output.clone()),
                )
                .await?;
            return Ok(NodeDone::Succeeded(output));
        }

        if let Err(e) = self.registry.validate_inputs(&def.name, Some(&def.version), &inputs) {
            return self.fail_before_invoke(&job, Some(&key), &e.to_string()).await;
        }

        let timeout = def
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        let max_attempts = if def.retryable {
            self.retry.max_attempts()
        } else {
            1
        };

        let mut attempt = job.prior_attempts;
        loop {
            attempt += 1;
            let attempts_this_run = attempt - job.prior_attempts;
            self.tracker
                .record(
                    plan_id,
                    NodeUpdate::new(node_id, NodeStatus::Running)
                        .attempts(attempt)
                        .key(&key)
                        .inputs(inputs.clone()),
                )
                .await?;

            let ctx = InvocationContext {
                plan_id,
                node_id: node_id.to_string(),
                target: job.target.clone(),
                idempotency_key: key.clone(),
                attempt,
            };
            tracing::debug!(%plan_id, node_id, action = %def.name, attempt, "Invoking action");

            let error = match tokio::time::timeout(timeout, action.invoke(&ctx, &inputs)).await {
                Ok(Ok(output)) => {
                    self.tracker
                        .record(
                            plan_id,
                            NodeUpdate::new(node_id, NodeStatus::Succeeded)
                                .attempts(attempt)
                                .output(output.clone()),
                        )
                        .await?;
                    tracing::info!(%plan_id, node_id, action = %def.name, attempt, "Node succeeded");
                    return Ok(NodeDone::Succeeded(output));
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

            let retry = error.is_retryable()
                && attempts_this_run < max_attempts
                && !cancel.is_cancelled();
            if !retry {
                return self.fail(plan_id, node_id, attempt, &error.to_string()).await;
            }

            let delay = self.retry.backoff(attempts_this_run - 1);
            tracing::warn!(
                %plan_id,
                node_id,
                action = %def.name,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying node"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    let reason = format!("cancelled before retry: {error}");
                    return self.fail(plan_id, node_id, attempt, &reason).await;
                }
            }
        }
    }

    async fn fail(
        &self,
        plan_id: Uuid,
        node_id: &str,
        attempt: u32,
        reason: &str,
    ) -> Result<NodeDone, StateError> {
        self.tracker
            .record(
                plan_id,
                NodeUpdate::new(node_id, NodeStatus::Failed)
                    .attempts(attempt)
                    .error(reason),
            )
            .await?;
        tracing::warn!(%plan_id, node_id, attempt, error = %reason, "Node failed");
        Ok(NodeDone::Failed)
    }

    /// A node that cannot be invoked still passes through `running` so its
    /// transitions stay forward-only.
    async fn fail_before_invoke(
        &self,
        job: &NodeJob,
        key: Option<&str>,
        reason: &str,
    ) -> Result<NodeDone, StateError> {
        let attempt = job.prior_attempts + 1;
        let mut running = NodeUpdate::new(&job.node.node_id, NodeStatus::Running).attempts(attempt);
        if let Some(key) = key {
            running = running.key(key);
        }
        self.tracker.record(job.plan_id, running).await?;
        let reason = ActionError::Permanent(reason.to_string()).to_string();
        self.fail(job.plan_id, &job.node.node_id, attempt, &reason).await
    }
}

fn block_dependents(failed: usize, dependents: &[Vec<usize>], slots: &mut [Slot]) {
    let mut stack = vec![failed];
    while let Some(i) = stack.pop() {
        for &d in &dependents[i] {
            if slots[d] == Slot::Waiting {
                slots[d] = Slot::Blocked;
                stack.push(d);
            }
        }
    }
}

/// Replace output references with the producing node's recorded output.
fn resolve_inputs(
    inputs: &Value,
    index: &HashMap<&str, usize>,
    outputs: &[Option<Value>],
) -> Result<Value, String> {
    if let Some((node_id, field)) = as_output_ref(inputs) {
        let producer = index
            .get(node_id)
            .ok_or_else(|| format!("reference to unknown node {node_id}"))?;
        let output = outputs[*producer]
            .as_ref()
            .ok_or_else(|| format!("node {node_id} has no recorded output"))?;
        return output
            .get(field)
            .cloned()
            .ok_or_else(|| format!("node {node_id} output has no field {field}"));
    }
    match inputs {
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                resolved.insert(k.clone(), resolve_inputs(v, index, outputs)?);
            }
            Ok(Value::Object(resolved))
        }
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_inputs(v, index, outputs))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infra_core::output_ref;
    use serde_json::json;

    #[test]
    fn references_resolve_from_outputs() {
        let index: HashMap<&str, usize> = [("n1", 0usize)].into_iter().collect();
        let outputs = vec![Some(json!({"volume_id": "vol-7"}))];
        let inputs = json!({"volume_id": output_ref("n1", "volume_id"), "mounts": [output_ref("n1", "volume_id")]});
        let resolved = resolve_inputs(&inputs, &index, &outputs).unwrap();
        assert_eq!(resolved, json!({"volume_id": "vol-7", "mounts": ["vol-7"]}));
    }

    #[test]
    fn missing_output_field_is_an_error() {
        let index: HashMap<&str, usize> = [("n1", 0usize)].into_iter().collect();
        let outputs = vec![Some(json!({}))];
        let err = resolve_inputs(&json!({"v": output_ref("n1", "volume_id")}), &index, &outputs).unwrap_err();
        assert!(err.contains("volume_id"));
    }

    #[test]
    fn blocking_is_transitive() {
        let dependents = vec![vec![1], vec![2], vec![], vec![]];
        let mut slots = vec![Slot::Failed, Slot::Waiting, Slot::Waiting, Slot::Waiting];
        block_dependents(0, &dependents, &mut slots);
        assert_eq!(slots, vec![Slot::Failed, Slot::Blocked, Slot::Blocked, Slot::Waiting]);
    }
}
