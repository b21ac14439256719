//! `infra-agent plan` - print the plan for an intent. Nothing is executed
//! or journaled.

use super::{load_intent, seeded_cluster};
use anyhow::Result;
use infra_core::AgentConfig;
use infra_report::{NullSink, Reporter};
use infra_runtime::Agent;
use infra_state::MemoryStore;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

pub async fn run(config: &AgentConfig, file: &Path, initial: &[(String, Value)]) -> Result<()> {
    let intent = load_intent(file)?;
    let cluster = seeded_cluster(&intent, initial);
    let agent = Agent::new(
        config,
        cluster.registry()?,
        cluster,
        Arc::new(MemoryStore::new()),
        Reporter::new(Arc::new(NullSink)),
    );

    let plan = agent.plan(&intent).await?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}
