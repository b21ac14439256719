//! Built-in cluster actions backed by an in-process simulated cluster.
//!
//! | Action | Effect | Compensation |
//! |--------|--------|--------------|
//! | `add_node` | `scaled_to += 1` | `remove_node` |
//! | `remove_node` | `scaled_to -= 1` (requires `scaled_to >= 1`) | `add_node` |
//! | `rollout_version` | `version = <requested>` | `rollback_version` |
//! | `rollback_version` | restores `previous_version` (never planned) | none |
//! | `restart_service` | `healthy = true`, after `rollout_version` | none |
//!
//! Every action applies its effect at most once per idempotency key. Faults
//! can be injected per action and per distinct invocation to exercise
//! retries, rollback and timeouts.

use crate::action::{Action, InvocationContext};
use crate::error::{ActionError, InventoryError, RegistryError};
use crate::inventory::Inventory;
use crate::registry::ActionRegistry;
use async_trait::async_trait;
use chrono::Utc;
use infra_core::{ActionDefinition, Condition, ResourceState, TargetResource};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// An injected failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub action: String,
    /// 1-based ordinal of the distinct idempotency key, per action.
    pub invocation: u32,
    pub kind: FaultKind,
    /// How many calls fail before the fault clears. `None` fails forever.
    pub times: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FaultKind {
    Fail(ActionError),
    /// Sleep before answering, to trip timeouts.
    Hang(Duration),
}

impl Fault {
    pub fn transient(action: impl Into<String>, invocation: u32) -> Self {
        Self::new(action, invocation, FaultKind::Fail(ActionError::Transient("injected fault".into())))
    }

    pub fn permanent(action: impl Into<String>, invocation: u32) -> Self {
        Self::new(action, invocation, FaultKind::Fail(ActionError::Permanent("injected fault".into())))
    }

    pub fn hang(action: impl Into<String>, invocation: u32, duration: Duration) -> Self {
        Self::new(action, invocation, FaultKind::Hang(duration))
    }

    fn new(action: impl Into<String>, invocation: u32, kind: FaultKind) -> Self {
        Self {
            action: action.into(),
            invocation,
            kind,
            times: None,
        }
    }

    /// Fail only the first `n` calls.
    pub fn times(mut self, n: u32) -> Self {
        self.times = Some(n);
        self
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    targets: HashMap<String, ResourceState>,
    members: HashMap<String, Vec<String>>,
    applied: HashMap<String, Value>,
    calls: HashMap<String, u32>,
    effects: HashMap<String, u32>,
    keys_seen: HashMap<String, Vec<String>>,
    faults: Vec<Fault>,
    next_member: u64,
}

impl ClusterState {
    fn target(&mut self, name: &str) -> &mut ResourceState {
        self.targets
            .entry(name.to_string())
            .or_insert_with(empty_cluster)
    }

    fn ordinal(&mut self, action: &str, key: &str) -> u32 {
        let seen = self.keys_seen.entry(action.to_string()).or_default();
        let pos = match seen.iter().position(|k| k == key) {
            Some(pos) => pos,
            None => {
                seen.push(key.to_string());
                seen.len() - 1
            }
        };
        u32::try_from(pos + 1).unwrap_or(u32::MAX)
    }

    fn take_fault(&mut self, action: &str, ordinal: u32) -> Option<FaultKind> {
        let fault = self.faults.iter_mut().find(|f| {
            f.action == action && f.invocation == ordinal && f.times.is_none_or(|n| n > 0)
        })?;
        if let Some(n) = fault.times.as_mut() {
            *n -= 1;
        }
        Some(fault.kind.clone())
    }
}

fn empty_cluster() -> ResourceState {
    ResourceState::new().with("scaled_to", 0)
}

/// In-memory stand-in for a cluster provider.
#[derive(Debug, Default)]
pub struct SimulatedCluster {
    state: Mutex<ClusterState>,
}

impl SimulatedCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a target's state. Numeric `scaled_to` also creates that many members.
    pub fn seed(&self, target: impl Into<String>, state: ResourceState) {
        let target = target.into();
        let Ok(mut st) = self.lock() else {
            return;
        };
        let count = state.get("scaled_to").and_then(Value::as_u64).unwrap_or(0);
        let mut members = Vec::new();
        for _ in 0..count {
            st.next_member += 1;
            members.push(format!("node-{}", st.next_member));
        }
        st.members.insert(target.clone(), members);
        st.targets.insert(target, state);
    }

    pub fn inject(&self, fault: Fault) {
        if let Ok(mut st) = self.lock() {
            st.faults.push(fault);
        }
    }

    pub fn state_of(&self, target: &str) -> Option<ResourceState> {
        self.lock().ok()?.targets.get(target).cloned()
    }

    pub fn members(&self, target: &str) -> Vec<String> {
        self.lock()
            .ok()
            .and_then(|st| st.members.get(target).cloned())
            .unwrap_or_default()
    }

    /// Calls received by an action, including retries and replays.
    pub fn calls(&self, action: &str) -> u32 {
        self.lock()
            .ok()
            .and_then(|st| st.calls.get(action).copied())
            .unwrap_or(0)
    }

    /// Effects actually applied by an action.
    pub fn effects(&self, action: &str) -> u32 {
        self.lock()
            .ok()
            .and_then(|st| st.effects.get(action).copied())
            .unwrap_or(0)
    }

    /// Definitions of the built-in actions, in declaration order.
    pub fn definitions() -> Vec<ActionDefinition> {
        let scale_schema = json!({
            "type": "object",
            "required": ["target", "attribute", "from", "to"],
            "properties": {
                "target": { "type": "string" },
                "attribute": { "type": "string" },
                "from": { "type": "integer" },
                "to": { "type": "integer" }
            }
        });
        vec![
            ActionDefinition::new("add_node")
                .describe("Add one node to the cluster")
                .input_schema(scale_schema.clone())
                .output("node_id")
                .increments("scaled_to", 1)
                .compensated_by("remove_node")
                .timeout_ms(10_000),
            ActionDefinition::new("remove_node")
                .describe("Remove one node from the cluster")
                .input_schema(scale_schema)
                .output("node_id")
                .requires(Condition::AtLeast {
                    attribute: "scaled_to".into(),
                    value: 1.0,
                })
                .increments("scaled_to", -1)
                .compensated_by("add_node")
                .timeout_ms(10_000),
            ActionDefinition::new("rollout_version")
                .describe("Roll the cluster out to a new version")
                .input_schema(json!({
                    "type": "object",
                    "required": ["target", "to"],
                    "properties": { "target": { "type": "string" } }
                }))
                .output("previous_version")
                .assigns("version")
                .compensated_by("rollback_version")
                .idempotent_on(&["target", "to"]),
            ActionDefinition::new("rollback_version")
                .describe("Restore the version recorded before a rollout")
                .input_schema(json!({
                    "type": "object",
                    "required": ["target"],
                    "properties": { "target": { "type": "string" } }
                }))
                .output("version"),
            ActionDefinition::new("restart_service")
                .describe("Restart the service so it reports healthy")
                .sets("healthy", true)
                .after("rollout_version")
                .output("restarted_at")
                .non_retryable(),
        ]
    }

    /// A registry holding the built-in actions bound to this cluster.
    pub fn registry(self: &Arc<Self>) -> Result<ActionRegistry, RegistryError> {
        let mut registry = ActionRegistry::new();
        for def in Self::definitions() {
            let op = match def.name.as_str() {
                "add_node" => Op::AddNode,
                "remove_node" => Op::RemoveNode,
                "rollout_version" => Op::RolloutVersion,
                "rollback_version" => Op::RollbackVersion,
                _ => Op::RestartService,
            };
            registry.register(Arc::new(ClusterAction {
                def,
                op,
                cluster: Arc::clone(self),
            }))?;
        }
        registry.verify_compensations()?;
        Ok(registry)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ClusterState>, ActionError> {
        self.state
            .lock()
            .map_err(|e| ActionError::Transient(format!("cluster state poisoned: {e}")))
    }
}

#[async_trait]
impl Inventory for SimulatedCluster {
    /// Targets never seeded start as an empty cluster.
    async fn current_state(&self, target: &TargetResource) -> Result<ResourceState, InventoryError> {
        let st = self
            .lock()
            .map_err(|e| InventoryError::Unavailable(e.to_string()))?;
        Ok(st
            .targets
            .get(&target.name)
            .cloned()
            .unwrap_or_else(empty_cluster))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    AddNode,
    RemoveNode,
    RolloutVersion,
    RollbackVersion,
    RestartService,
}

struct ClusterAction {
    def: ActionDefinition,
    op: Op,
    cluster: Arc<SimulatedCluster>,
}

#[async_trait]
impl Action for ClusterAction {
    fn definition(&self) -> &ActionDefinition {
        &self.def
    }

    async fn invoke(&self, ctx: &InvocationContext, inputs: &Value) -> Result<Value, ActionError> {
        let name = self.def.name.as_str();
        let fault = {
            let mut st = self.cluster.lock()?;
            *st.calls.entry(name.to_string()).or_default() += 1;
            let ordinal = st.ordinal(name, &ctx.idempotency_key);
            st.take_fault(name, ordinal)
        };
        match fault {
            Some(FaultKind::Fail(e)) => return Err(e),
            Some(FaultKind::Hang(d)) => {
                tokio::time::sleep(d).await;
                return Err(ActionError::Transient("hung".into()));
            }
            None => {}
        }

        let mut st = self.cluster.lock()?;
        if let Some(output) = st.applied.get(&ctx.idempotency_key) {
            return Ok(output.clone());
        }
        let output = self.apply(&mut st, &ctx.target.name, inputs)?;
        st.applied.insert(ctx.idempotency_key.clone(), output.clone());
        *st.effects.entry(name.to_string()).or_default() += 1;
        tracing::debug!(target_name = %ctx.target.name, action = name, "Simulated cluster applied action");
        Ok(output)
    }
}

impl ClusterAction {
    fn apply(&self, st: &mut ClusterState, target: &str, inputs: &Value) -> Result<Value, ActionError> {
        match self.op {
            Op::AddNode => {
                st.next_member += 1;
                let member = format!("node-{}", st.next_member);
                st.members
                    .entry(target.to_string())
                    .or_default()
                    .push(member.clone());
                let scaled_to = bump(st.target(target), 1);
                Ok(json!({ "node_id": member, "scaled_to": scaled_to }))
            }
            Op::RemoveNode => {
                let current = st.target(target).get("scaled_to").and_then(Value::as_i64).unwrap_or(0);
                if current < 1 {
                    return Err(ActionError::Permanent(format!("{target} has no nodes to remove")));
                }
                let members = st.members.entry(target.to_string()).or_default();
                let requested = inputs.get("node_id").and_then(Value::as_str);
                let removed = match requested.and_then(|id| members.iter().position(|m| m == id)) {
                    Some(pos) => Some(members.remove(pos)),
                    None => members.pop(),
                };
                let scaled_to = bump(st.target(target), -1);
                Ok(json!({ "node_id": removed, "scaled_to": scaled_to }))
            }
            Op::RolloutVersion => {
                let version = inputs
                    .get("to")
                    .cloned()
                    .ok_or_else(|| ActionError::InvalidInput("missing `to`".into()))?;
                let state = st.target(target);
                let previous = state.get("version").cloned().unwrap_or(Value::Null);
                state.set("version", version.clone());
                Ok(json!({ "previous_version": previous, "version": version }))
            }
            Op::RollbackVersion => {
                let previous = inputs.get("previous_version").cloned().unwrap_or(Value::Null);
                st.target(target).set("version", previous.clone());
                Ok(json!({ "version": previous }))
            }
            Op::RestartService => {
                st.target(target).set("healthy", Value::Bool(true));
                Ok(json!({ "restarted_at": Utc::now().to_rfc3339() }))
            }
        }
    }
}

fn bump(state: &mut ResourceState, by: i64) -> i64 {
    let next = state.get("scaled_to").and_then(Value::as_i64).unwrap_or(0) + by;
    state.set("scaled_to", Value::from(next));
    next
}
