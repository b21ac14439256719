//! `infra-agent serve` - run the HTTP API against the simulated cluster.

use super::Seed;
use anyhow::{Context, Result};
use infra_core::AgentConfig;
use infra_runtime::{Agent, SimulatedCluster};
use infra_server::{AgentServer, AppState};
use std::sync::Arc;

pub async fn run(config: &AgentConfig, seeds: &[Seed]) -> Result<()> {
    let cluster = Arc::new(SimulatedCluster::new());
    for seed in seeds {
        cluster.seed(seed.target.clone(), seed.state.clone());
    }

    let agent = Agent::from_config(config, cluster.registry()?, cluster)
        .context("failed to build agent")?;
    tracing::info!(
        actions = agent.registry().len(),
        backend = ?config.state.backend,
        sink = ?config.reporting.sink,
        "Agent ready"
    );

    let state = AppState::new(Arc::new(agent), config.webhooks.grafana.clone());
    AgentServer::new(config.server.clone(), state).run().await?;
    Ok(())
}
