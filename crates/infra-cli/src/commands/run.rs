//! `infra-agent run` - plan, execute and report one intent against the
//! simulated cluster, using the configured store and report sink.

use super::{FaultArg, load_intent, seeded_cluster};
use anyhow::{Result, bail};
use infra_core::{AgentConfig, PlanOutcome};
use infra_runtime::Agent;
use serde_json::Value;
use std::path::Path;

pub async fn run(
    config: &AgentConfig,
    file: &Path,
    initial: &[(String, Value)],
    faults: &[FaultArg],
) -> Result<()> {
    let intent = load_intent(file)?;
    let cluster = seeded_cluster(&intent, initial);
    for fault in faults {
        cluster.inject(fault.to_fault());
    }
    let target = intent.target.name.clone();

    let agent = Agent::from_config(config, cluster.registry()?, cluster.clone())?;
    let report = agent.run_intent(intent).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(state) = cluster.state_of(&target) {
        tracing::info!(target_name = %target, state = %state, "Final cluster state");
    }

    if report.outcome != PlanOutcome::Succeeded {
        bail!("plan {} finished {:?}", report.plan_id, report.outcome);
    }
    Ok(())
}
