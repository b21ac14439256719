//! Shared application state.

use infra_core::GrafanaWebhookConfig;
use infra_report::OutcomeReport;
use infra_runtime::Agent;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    agent: Arc<Agent>,
    grafana: Arc<GrafanaWebhookConfig>,
}

impl AppState {
    pub fn new(agent: Arc<Agent>, grafana: GrafanaWebhookConfig) -> Self {
        Self {
            agent,
            grafana: Arc::new(grafana),
        }
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn grafana(&self) -> &GrafanaWebhookConfig {
        &self.grafana
    }

    /// Run a journaled plan on a background task. The outcome is delivered
    /// through the agent's report sink.
    pub fn spawn_execution(&self, plan_id: Uuid) -> tokio::task::JoinHandle<Option<OutcomeReport>> {
        let agent = Arc::clone(&self.agent);
        tokio::spawn(async move {
            match agent.execute(plan_id).await {
                Ok(report) => {
                    tracing::info!(%plan_id, outcome = ?report.outcome, "Plan run finished");
                    Some(report)
                }
                Err(e) => {
                    tracing::error!(%plan_id, error = %e, "Plan run failed to start");
                    None
                }
            }
        })
    }
}
