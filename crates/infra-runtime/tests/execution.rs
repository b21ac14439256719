//! End-to-end execution against the simulated cluster and against
//! independent test actions.

use async_trait::async_trait;
use infra_core::{
    ActionDefinition, AgentConfig, ExecutionRecord, Intent, NodeStatus, Plan, PlanOutcome,
    ResourceState, StateBackend,
};
use infra_planner::PlanError;
use infra_report::{MemorySink, Reporter};
use infra_runtime::{
    Action, ActionError, ActionRegistry, Agent, AgentError, Fault, InvocationContext,
    SimulatedCluster, StaticInventory,
};
use infra_state::{EntryKind, JournalEntry, MemoryStore, StateError, StateStore};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

fn config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 4;
    config
}

fn cluster_at(scaled_to: i64) -> Arc<SimulatedCluster> {
    let cluster = Arc::new(SimulatedCluster::new());
    cluster.seed("cache-cluster-1", ResourceState::new().with("scaled_to", scaled_to));
    cluster
}

fn agent(cluster: &Arc<SimulatedCluster>, store: Arc<dyn StateStore>, sink: Arc<MemorySink>) -> Agent {
    Agent::new(
        &config(),
        cluster.registry().unwrap(),
        cluster.clone(),
        store,
        Reporter::new(sink),
    )
}

fn scale_to(n: i64) -> Intent {
    Intent::new("cache-cluster-1", ResourceState::new().with("scaled_to", n))
}

/// Node statuses in the order they were journaled.
fn transitions(entries: &[JournalEntry]) -> HashMap<String, Vec<(u64, NodeStatus)>> {
    let mut by_node: HashMap<String, Vec<(u64, NodeStatus)>> = HashMap::new();
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|e| e.seq);
    for entry in sorted {
        if let EntryKind::NodeUpdated(update) = entry.kind {
            by_node
                .entry(update.node_id)
                .or_default()
                .push((entry.seq, update.status));
        }
    }
    by_node
}

/// Fails every append after the first `limit`.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    limit: usize,
    appended: AtomicUsize,
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn append(&self, entry: &JournalEntry) -> Result<(), StateError> {
        if self.appended.fetch_add(1, Ordering::SeqCst) >= self.limit {
            return Err(StateError::Persistence("disk unplugged".into()));
        }
        self.inner.append(entry).await
    }

    async fn load(&self, plan_id: Uuid) -> Result<Vec<JournalEntry>, StateError> {
        self.inner.load(plan_id).await
    }

    async fn plan_ids(&self) -> Result<Vec<Uuid>, StateError> {
        self.inner.plan_ids().await
    }
}

#[tokio::test]
async fn scale_up_runs_each_node_forward_once() {
    let cluster = cluster_at(3);
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());
    let agent = agent(&cluster, store.clone(), sink.clone());

    let report = agent.run_intent(scale_to(6)).await.unwrap();
    assert_eq!(report.outcome, PlanOutcome::Succeeded);
    assert_eq!(cluster.state_of("cache-cluster-1").unwrap().get("scaled_to"), Some(&json!(6)));
    assert_eq!(sink.reports().len(), 1);

    let entries = store.load(report.plan_id).await.unwrap();
    for (node, statuses) in transitions(&entries) {
        let statuses: Vec<NodeStatus> = statuses.into_iter().map(|(_, s)| s).collect();
        assert_eq!(statuses, vec![NodeStatus::Running, NodeStatus::Succeeded], "{node}");
    }
}

#[tokio::test]
async fn dependents_start_only_after_dependencies_succeed() {
    let cluster = cluster_at(0);
    let store = Arc::new(MemoryStore::new());
    let agent = agent(&cluster, store.clone(), Arc::new(MemorySink::new()));

    let report = agent.run_intent(scale_to(4)).await.unwrap();
    let record = agent.status(report.plan_id).await.unwrap();
    let by_node = transitions(&store.load(report.plan_id).await.unwrap());

    for node in &record.plan.nodes {
        let started = by_node[&node.node_id]
            .iter()
            .find(|(_, s)| *s == NodeStatus::Running)
            .map(|(seq, _)| *seq)
            .unwrap();
        for dep in &node.depends_on {
            let succeeded = by_node[dep]
                .iter()
                .find(|(_, s)| *s == NodeStatus::Succeeded)
                .map(|(seq, _)| *seq)
                .unwrap();
            assert!(succeeded < started, "{} started before {dep} succeeded", node.node_id);
        }
    }
}

#[tokio::test]
async fn failing_second_add_node_rolls_back_the_first() {
    let cluster = cluster_at(3);
    cluster.inject(Fault::transient("add_node", 2));
    let sink = Arc::new(MemorySink::new());
    let agent = agent(&cluster, Arc::new(MemoryStore::new()), sink.clone());

    let plan = agent.submit(scale_to(6)).await.unwrap();
    assert_eq!(plan.actions(), vec!["add_node", "add_node", "add_node"]);

    let report = agent.execute(plan.plan_id).await.unwrap();
    assert_eq!(report.outcome, PlanOutcome::Failed);

    let record = agent.status(plan.plan_id).await.unwrap();
    let ids: Vec<&str> = plan.nodes.iter().map(|n| n.node_id.as_str()).collect();
    assert_eq!(record.status_of(ids[0]), NodeStatus::Compensated);
    assert_eq!(record.status_of(ids[1]), NodeStatus::Failed);
    assert_eq!(record.status_of(ids[2]), NodeStatus::Pending);
    assert_eq!(record.nodes[ids[1]].attempts, 4);
    assert_eq!(record.outcome, Some(PlanOutcome::Failed));

    assert_eq!(cluster.calls("add_node"), 5);
    assert_eq!(cluster.effects("add_node"), 1);
    assert_eq!(cluster.effects("remove_node"), 1);
    assert_eq!(cluster.state_of("cache-cluster-1").unwrap().get("scaled_to"), Some(&json!(3)));
    assert!(report.is_clean());
    assert_eq!(sink.reports()[0].outcome, PlanOutcome::Failed);
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let cluster = cluster_at(3);
    cluster.inject(Fault::permanent("add_node", 2));
    let agent = agent(&cluster, Arc::new(MemoryStore::new()), Arc::new(MemorySink::new()));

    let report = agent.run_intent(scale_to(5)).await.unwrap();
    assert_eq!(report.outcome, PlanOutcome::Failed);
    assert_eq!(report.nodes[1].status, NodeStatus::Failed);
    assert_eq!(report.nodes[1].attempts, 1);
    assert_eq!(report.nodes[0].status, NodeStatus::Compensated);
}

#[tokio::test]
async fn transient_failure_recovers_within_retry_budget() {
    let cluster = cluster_at(3);
    cluster.inject(Fault::transient("add_node", 1).times(2));
    let agent = agent(&cluster, Arc::new(MemoryStore::new()), Arc::new(MemorySink::new()));

    let report = agent.run_intent(scale_to(4)).await.unwrap();
    assert_eq!(report.outcome, PlanOutcome::Succeeded);
    assert_eq!(report.nodes[0].attempts, 3);
    assert_eq!(cluster.effects("add_node"), 1);
}

#[tokio::test]
async fn resumed_run_skips_succeeded_nodes() {
    let cluster = cluster_at(3);
    let durable = Arc::new(MemoryStore::new());

    // created, n1 running, n1 succeeded; the write marking n2 running fails.
    let flaky = Arc::new(FlakyStore {
        inner: durable.clone(),
        limit: 3,
        appended: AtomicUsize::new(0),
    });
    let crashed = agent(&cluster, flaky, Arc::new(MemorySink::new()));
    let plan = crashed.submit(scale_to(5)).await.unwrap();
    let report = crashed.execute(plan.plan_id).await.unwrap();
    assert_eq!(report.outcome, PlanOutcome::Aborted);
    assert_eq!(cluster.calls("add_node"), 1);

    let restarted = agent(&cluster, durable, Arc::new(MemorySink::new()));
    let before = restarted.status(plan.plan_id).await.unwrap();
    assert!(before.outcome.is_none());
    assert_eq!(before.status_of(&plan.nodes[0].node_id), NodeStatus::Succeeded);

    let reports = restarted.resume_incomplete().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, PlanOutcome::Succeeded);
    assert_eq!(cluster.calls("add_node"), 2);
    assert_eq!(cluster.state_of("cache-cluster-1").unwrap().get("scaled_to"), Some(&json!(5)));
}

#[tokio::test]
async fn node_in_flight_at_crash_reuses_its_idempotency_key() {
    let cluster = cluster_at(3);
    let durable = Arc::new(MemoryStore::new());

    // The effect of n2 is applied but its success is never journaled.
    let flaky = Arc::new(FlakyStore {
        inner: durable.clone(),
        limit: 4,
        appended: AtomicUsize::new(0),
    });
    let crashed = agent(&cluster, flaky, Arc::new(MemorySink::new()));
    let plan = crashed.submit(scale_to(5)).await.unwrap();
    crashed.execute(plan.plan_id).await.unwrap();
    assert_eq!(cluster.effects("add_node"), 2);

    let restarted = agent(&cluster, durable, Arc::new(MemorySink::new()));
    let record = restarted.status(plan.plan_id).await.unwrap();
    assert_eq!(record.status_of(&plan.nodes[1].node_id), NodeStatus::Running);

    let report = restarted.execute(plan.plan_id).await.unwrap();
    assert_eq!(report.outcome, PlanOutcome::Succeeded);
    assert_eq!(report.nodes[1].attempts, 2);
    assert_eq!(cluster.calls("add_node"), 3);
    assert_eq!(cluster.effects("add_node"), 2);
    assert_eq!(cluster.state_of("cache-cluster-1").unwrap().get("scaled_to"), Some(&json!(5)));
}

#[tokio::test]
async fn finished_plan_is_not_run_again() {
    let cluster = cluster_at(3);
    let sink = Arc::new(MemorySink::new());
    let agent = agent(&cluster, Arc::new(MemoryStore::new()), sink.clone());

    let first = agent.run_intent(scale_to(4)).await.unwrap();
    let again = agent.execute(first.plan_id).await.unwrap();
    assert_eq!(again.outcome, PlanOutcome::Succeeded);
    assert_eq!(cluster.calls("add_node"), 1);
    assert_eq!(sink.reports().len(), 1);
}

#[tokio::test]
async fn identical_intents_plan_identical_node_order() {
    let cluster = cluster_at(3);
    let agent = agent(&cluster, Arc::new(MemoryStore::new()), Arc::new(MemorySink::new()));
    let intent = Intent::new(
        "cache-cluster-1",
        ResourceState::new()
            .with("scaled_to", 5)
            .with("version", "2.0.0")
            .with("healthy", true),
    );

    let a = agent.plan(&intent).await.unwrap();
    let b = agent.plan(&intent).await.unwrap();
    let shape = |p: &infra_core::Plan| {
        p.nodes
            .iter()
            .map(|n| (n.node_id.clone(), n.inputs.clone(), n.depends_on.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(shape(&a), shape(&b));
    assert_ne!(a.plan_id, b.plan_id);
}

#[tokio::test]
async fn nodes_without_compensation_are_reported_uncompensated() {
    let cluster = Arc::new(SimulatedCluster::new());
    cluster.seed(
        "cache-cluster-1",
        ResourceState::new().with("scaled_to", 3).with("version", "1.0.0"),
    );
    cluster.inject(Fault::permanent("add_node", 1));
    let agent = agent(&cluster, Arc::new(MemoryStore::new()), Arc::new(MemorySink::new()));

    let intent = Intent::new(
        "cache-cluster-1",
        ResourceState::new()
            .with("scaled_to", 4)
            .with("version", "2.0.0")
            .with("healthy", true),
    );
    let plan = agent.submit(intent).await.unwrap();
    assert_eq!(plan.actions(), vec!["add_node", "rollout_version", "restart_service"]);

    let report = agent.execute(plan.plan_id).await.unwrap();
    assert_eq!(report.outcome, PlanOutcome::Failed);
    assert_eq!(report.uncompensated, vec![plan.nodes[2].node_id.clone()]);
    assert_eq!(report.nodes[1].status, NodeStatus::Compensated);
    assert_eq!(
        cluster.state_of("cache-cluster-1").unwrap().get("version"),
        Some(&json!("1.0.0"))
    );
}

#[tokio::test]
async fn exhausted_compensation_requires_manual_intervention() {
    let cluster = cluster_at(3);
    cluster.inject(Fault::permanent("add_node", 2));
    cluster.inject(Fault::transient("remove_node", 1));
    let agent = agent(&cluster, Arc::new(MemoryStore::new()), Arc::new(MemorySink::new()));

    let report = agent.run_intent(scale_to(5)).await.unwrap();
    assert_eq!(report.outcome, PlanOutcome::Failed);
    assert_eq!(report.manual_intervention, vec![report.nodes[0].node_id.clone()]);
    assert_eq!(report.nodes[0].compensation_attempts, 4);
    assert_eq!(cluster.calls("remove_node"), 4);
    assert!(!report.is_clean());
}

#[tokio::test]
async fn timed_out_attempt_is_retried() {
    let cluster = cluster_at(1);
    cluster.inject(Fault::hang("rollout_version", 1, Duration::from_secs(5)).times(1));
    let mut config = config();
    config.executor.default_timeout_ms = 20;
    let agent = Agent::new(
        &config,
        cluster.registry().unwrap(),
        cluster.clone(),
        Arc::new(MemoryStore::new()),
        Reporter::new(Arc::new(MemorySink::new())),
    );

    let intent = Intent::new("cache-cluster-1", ResourceState::new().with("version", "2.0.0"));
    let report = agent.run_intent(intent).await.unwrap();
    assert_eq!(report.outcome, PlanOutcome::Succeeded);
    assert_eq!(report.nodes[0].attempts, 2);
}

#[tokio::test]
async fn cancelled_before_start_runs_nothing() {
    let cluster = cluster_at(3);
    let agent = agent(&cluster, Arc::new(MemoryStore::new()), Arc::new(MemorySink::new()));

    let plan = agent.submit(scale_to(6)).await.unwrap();
    assert!(agent.cancel(plan.plan_id));
    let report = agent.execute(plan.plan_id).await.unwrap();
    assert_eq!(report.outcome, PlanOutcome::Cancelled);
    assert_eq!(cluster.calls("add_node"), 0);
    assert!(!agent.cancel(plan.plan_id));
    assert!(!agent.cancel(Uuid::new_v4()));
}

#[tokio::test]
async fn unplannable_intent_has_no_side_effects() {
    let cluster = cluster_at(1);
    let agent = agent(&cluster, Arc::new(MemoryStore::new()), Arc::new(MemorySink::new()));

    let intent = Intent::new("cache-cluster-1", ResourceState::new().with("scaled_to", -2));
    let err = agent.submit(intent).await.unwrap_err();
    assert!(matches!(err, AgentError::Plan(PlanError::UnplannableIntent { .. })));
    assert!(agent.plans().await.unwrap().is_empty());
    assert_eq!(cluster.calls("remove_node"), 0);
}

#[tokio::test]
async fn empty_plan_succeeds_trivially() {
    let cluster = cluster_at(3);
    let agent = agent(&cluster, Arc::new(MemoryStore::new()), Arc::new(MemorySink::new()));
    let report = agent.run_intent(scale_to(3)).await.unwrap();
    assert_eq!(report.outcome, PlanOutcome::Succeeded);
    assert!(report.nodes.is_empty());
}

#[tokio::test]
async fn redb_backed_agent_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.state.backend = StateBackend::Redb;
    config.state.path = dir.path().join("journal.redb");
    let cluster = cluster_at(3);

    let plan_id = {
        let agent = Agent::from_config(&config, cluster.registry().unwrap(), cluster.clone()).unwrap();
        agent.run_intent(scale_to(4)).await.unwrap().plan_id
    };

    let agent = Agent::from_config(&config, cluster.registry().unwrap(), cluster.clone()).unwrap();
    let record = agent.status(plan_id).await.unwrap();
    assert_eq!(record.outcome, Some(PlanOutcome::Succeeded));
    assert!(matches!(
        agent.status(Uuid::new_v4()).await,
        Err(AgentError::UnknownPlan(_))
    ));
}

/// Calls and concurrency seen across a set of [`Setter`] actions.
#[derive(Default)]
struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: std::sync::Mutex<Vec<String>>,
}

impl Gauge {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

enum Behaviour {
    Succeed(Duration),
    Fail,
    /// Signal `started`, then hold until `release`.
    Gate {
        started: Arc<Notify>,
        release: Arc<Notify>,
    },
}

struct Setter {
    definition: ActionDefinition,
    gauge: Arc<Gauge>,
    behaviour: Behaviour,
}

#[async_trait]
impl Action for Setter {
    fn definition(&self) -> &ActionDefinition {
        &self.definition
    }

    async fn invoke(&self, _ctx: &InvocationContext, _inputs: &Value) -> Result<Value, ActionError> {
        let now = self.gauge.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        self.gauge.calls.lock().unwrap().push(self.definition.name.clone());
        let result = match &self.behaviour {
            Behaviour::Succeed(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(json!({}))
            }
            Behaviour::Fail => Err(ActionError::Permanent("refused".into())),
            Behaviour::Gate { started, release } => {
                started.notify_one();
                release.notified().await;
                Ok(json!({}))
            }
        };
        self.gauge.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// One `set_<attr>` action per attribute, each undone by `unset_<attr>`.
/// No two actions touch the same attribute, so the plan has no edges.
fn independent_agent(
    attributes: &[&str],
    max_in_flight: usize,
    behaviour: impl Fn(&str) -> Behaviour,
) -> (Agent, Arc<Gauge>) {
    let gauge = Arc::new(Gauge::default());
    let mut registry = ActionRegistry::new();
    for attribute in attributes {
        let set = format!("set_{attribute}");
        let unset = format!("unset_{attribute}");
        registry
            .register(Arc::new(Setter {
                definition: ActionDefinition::new(&set)
                    .sets(*attribute, 1)
                    .compensated_by(&unset),
                gauge: gauge.clone(),
                behaviour: behaviour(&set),
            }))
            .unwrap();
        registry
            .register(Arc::new(Setter {
                definition: ActionDefinition::new(&unset),
                gauge: gauge.clone(),
                behaviour: Behaviour::Succeed(Duration::ZERO),
            }))
            .unwrap();
    }

    let mut config = config();
    config.executor.max_in_flight = max_in_flight;
    let inventory = StaticInventory::new().with("svc-1", ResourceState::new());
    let agent = Agent::new(
        &config,
        registry,
        Arc::new(inventory),
        Arc::new(MemoryStore::new()),
        Reporter::new(Arc::new(MemorySink::new())),
    );
    (agent, gauge)
}

fn set_all(attributes: &[&str]) -> Intent {
    let desired = attributes
        .iter()
        .fold(ResourceState::new(), |state, a| state.with(*a, 1));
    Intent::new("svc-1", desired)
}

fn status_of_action(record: &ExecutionRecord, plan: &Plan, action: &str) -> NodeStatus {
    let node = plan.nodes.iter().find(|n| n.action == action).unwrap();
    record.status_of(&node.node_id)
}

#[tokio::test]
async fn independent_branches_finish_before_rollback() {
    let attributes = ["a", "b", "c"];
    let (agent, gauge) = independent_agent(&attributes, 4, |action| match action {
        "set_a" => Behaviour::Fail,
        _ => Behaviour::Succeed(Duration::from_millis(10)),
    });

    let plan = agent.submit(set_all(&attributes)).await.unwrap();
    assert_eq!(plan.actions(), vec!["set_a", "set_b", "set_c"]);
    assert!(plan.nodes.iter().all(|n| n.depends_on.is_empty()));

    let report = agent.execute(plan.plan_id).await.unwrap();
    assert_eq!(report.outcome, PlanOutcome::Failed);

    let record = agent.status(plan.plan_id).await.unwrap();
    assert_eq!(status_of_action(&record, &plan, "set_a"), NodeStatus::Failed);
    assert_eq!(status_of_action(&record, &plan, "set_b"), NodeStatus::Compensated);
    assert_eq!(status_of_action(&record, &plan, "set_c"), NodeStatus::Compensated);

    let calls = gauge.calls();
    assert!(calls.contains(&"unset_b".to_string()));
    assert!(calls.contains(&"unset_c".to_string()));
    assert!(!calls.contains(&"unset_a".to_string()));
}

#[tokio::test]
async fn max_in_flight_bounds_concurrent_invocations() {
    let attributes = ["a", "b", "c", "d", "e"];
    let (agent, gauge) = independent_agent(&attributes, 2, |_| {
        Behaviour::Succeed(Duration::from_millis(20))
    });

    let report = agent.run_intent(set_all(&attributes)).await.unwrap();
    assert_eq!(report.outcome, PlanOutcome::Succeeded);
    assert_eq!(gauge.calls().len(), 5);
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cancelling_mid_run_drains_in_flight_and_rolls_back() {
    let attributes = ["a", "b", "c"];
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let (agent, gauge) = {
        let started = started.clone();
        let release = release.clone();
        independent_agent(&attributes, 1, move |action| match action {
            "set_a" => Behaviour::Gate {
                started: started.clone(),
                release: release.clone(),
            },
            _ => Behaviour::Succeed(Duration::ZERO),
        })
    };
    let agent = Arc::new(agent);

    let plan = agent.submit(set_all(&attributes)).await.unwrap();
    let running = {
        let agent = agent.clone();
        let plan_id = plan.plan_id;
        tokio::spawn(async move { agent.execute(plan_id).await })
    };

    started.notified().await;
    assert!(agent.cancel(plan.plan_id));
    release.notify_one();

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.outcome, PlanOutcome::Cancelled);

    let record = agent.status(plan.plan_id).await.unwrap();
    assert_eq!(status_of_action(&record, &plan, "set_a"), NodeStatus::Compensated);
    assert_eq!(status_of_action(&record, &plan, "set_b"), NodeStatus::Pending);
    assert_eq!(status_of_action(&record, &plan, "set_c"), NodeStatus::Pending);
    assert_eq!(gauge.calls(), vec!["set_a", "unset_a"]);
}
