//! The agent facade: intent in, report out.

use crate::error::AgentError;
use crate::executor::Executor;
use crate::inventory::Inventory;
use crate::registry::ActionRegistry;
use crate::retry::RetryPolicy;
use crate::rollback::RollbackCoordinator;
use infra_core::{AgentConfig, ExecutionRecord, Intent, Plan, PlanOutcome};
use infra_planner::Planner;
use infra_report::{OutcomeReport, Reporter};
use infra_state::{StateStore, StateTracker, create_store};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Wires the planner, executor, rollback coordinator and reporter around one
/// registry and one state store.
pub struct Agent {
    registry: Arc<ActionRegistry>,
    inventory: Arc<dyn Inventory>,
    planner: Planner,
    tracker: Arc<StateTracker>,
    executor: Executor,
    rollback: RollbackCoordinator,
    reporter: Reporter,
    active: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl Agent {
    pub fn new(
        config: &AgentConfig,
        registry: ActionRegistry,
        inventory: Arc<dyn Inventory>,
        store: Arc<dyn StateStore>,
        reporter: Reporter,
    ) -> Self {
        let registry = Arc::new(registry);
        let tracker = Arc::new(StateTracker::new(store));
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            executor: Executor::new(
                Arc::clone(&registry),
                Arc::clone(&tracker),
                &config.executor,
                retry,
            ),
            rollback: RollbackCoordinator::new(
                Arc::clone(&registry),
                Arc::clone(&tracker),
                retry,
                config.executor.default_timeout(),
            ),
            planner: Planner::new(&config.planner),
            registry,
            inventory,
            tracker,
            reporter,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Build the store and report sink named by the configuration.
    pub fn from_config(
        config: &AgentConfig,
        registry: ActionRegistry,
        inventory: Arc<dyn Inventory>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        registry.verify_compensations()?;
        let store = create_store(&config.state)?;
        let reporter = Reporter::from_config(&config.reporting)?;
        Ok(Self::new(config, registry, inventory, store, reporter))
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<StateTracker> {
        &self.tracker
    }

    /// Plan an intent against the inventory's current state. No side effects.
    pub async fn plan(&self, intent: &Intent) -> Result<Plan, AgentError> {
        let current = self.inventory.current_state(&intent.target).await?;
        Ok(self.planner.plan(self.registry.as_ref(), intent, &current)?)
    }

    /// Plan an intent and journal the plan. Execution is left to
    /// [`execute`](Self::execute) so callers choose where it runs.
    pub async fn submit(&self, intent: Intent) -> Result<Plan, AgentError> {
        let plan = self.plan(&intent).await?;
        self.tracker.begin(&plan).await?;
        self.token(plan.plan_id);
        tracing::info!(
            plan_id = %plan.plan_id,
            intent_id = %intent.intent_id,
            correlation_id = %intent.correlation_id,
            nodes = plan.len(),
            "Intent accepted"
        );
        Ok(plan)
    }

    /// Run a journaled plan to completion, roll back if needed, record the
    /// outcome and report it.
    ///
    /// A plan that already has an outcome is reported from its record
    /// without running anything. An aborted run leaves the record without an
    /// outcome so it can be resumed.
    pub async fn execute(&self, plan_id: Uuid) -> Result<OutcomeReport, AgentError> {
        let record = self
            .tracker
            .load(plan_id)
            .await?
            .ok_or(AgentError::UnknownPlan(plan_id))?;
        if let Some(outcome) = record.outcome {
            return Ok(OutcomeReport::from_record(&record, outcome));
        }

        let cancel = self.token(plan_id);
        let outcome = self.executor.run(&record.plan, &cancel).await;
        let outcome = self.settle(plan_id, outcome).await;
        self.release(plan_id);

        let record = match self.tracker.snapshot(plan_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(%plan_id, error = %e, "Execution record unavailable for reporting");
                record
            }
        };
        Ok(self.reporter.report(&record, outcome).await)
    }

    /// Submit and execute in one call.
    pub async fn run_intent(&self, intent: Intent) -> Result<OutcomeReport, AgentError> {
        let plan = self.submit(intent).await?;
        self.execute(plan.plan_id).await
    }

    /// Roll back when needed, then persist the outcome. Persistence failures
    /// turn the outcome into `Aborted`, which is never persisted.
    async fn settle(&self, plan_id: Uuid, outcome: PlanOutcome) -> PlanOutcome {
        if outcome == PlanOutcome::Aborted {
            return outcome;
        }
        if outcome.needs_rollback() {
            if let Err(e) = self.rollback.compensate(plan_id).await {
                tracing::error!(%plan_id, error = %e, "Rollback aborted");
                return PlanOutcome::Aborted;
            }
        }
        if let Err(e) = self.tracker.finish(plan_id, outcome).await {
            tracing::error!(%plan_id, error = %e, "Failed to record plan outcome");
            return PlanOutcome::Aborted;
        }
        outcome
    }

    /// Execution record snapshot.
    pub async fn status(&self, plan_id: Uuid) -> Result<ExecutionRecord, AgentError> {
        self.tracker
            .load(plan_id)
            .await?
            .ok_or(AgentError::UnknownPlan(plan_id))
    }

    /// Every journaled plan id.
    pub async fn plans(&self) -> Result<Vec<Uuid>, AgentError> {
        Ok(self.tracker.plan_ids().await?)
    }

    /// Request cancellation of a submitted or running plan. Returns false
    /// when nothing is active under that id.
    pub fn cancel(&self, plan_id: Uuid) -> bool {
        let Ok(active) = self.active.lock() else {
            return false;
        };
        match active.get(&plan_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(%plan_id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, plan_id: Uuid) -> bool {
        self.active
            .lock()
            .map(|a| a.contains_key(&plan_id))
            .unwrap_or(false)
    }

    /// Execute every journaled plan that has no outcome yet, oldest first.
    pub async fn resume_incomplete(&self) -> Result<Vec<OutcomeReport>, AgentError> {
        let mut reports = Vec::new();
        for record in self.tracker.list().await? {
            if record.is_finished() || self.is_active(record.plan_id) {
                continue;
            }
            tracing::info!(plan_id = %record.plan_id, "Resuming unfinished plan");
            reports.push(self.execute(record.plan_id).await?);
        }
        Ok(reports)
    }

    fn token(&self, plan_id: Uuid) -> CancellationToken {
        match self.active.lock() {
            Ok(mut active) => active.entry(plan_id).or_default().clone(),
            Err(_) => CancellationToken::new(),
        }
    }

    fn release(&self, plan_id: Uuid) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&plan_id);
        }
    }
}
