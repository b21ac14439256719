//! `infra-agent status` - read a plan's execution record from the
//! configured store.

use anyhow::{Result, anyhow};
use infra_core::{AgentConfig, StateBackend};
use infra_state::{StateTracker, create_store};
use uuid::Uuid;

pub async fn run(config: &AgentConfig, plan_id: Uuid, json: bool) -> Result<()> {
    if config.state.backend == StateBackend::Memory {
        tracing::warn!("state.backend is memory; records from other processes are not visible");
    }
    let tracker = StateTracker::new(create_store(&config.state)?);
    let record = tracker
        .load(plan_id)
        .await?
        .ok_or_else(|| anyhow!("unknown plan {plan_id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("plan      {}", record.plan_id);
    println!("intent    {} ({})", record.intent_id, record.plan.intent.target);
    println!("corr. id  {}", record.correlation_id);
    match record.outcome {
        Some(outcome) => println!("outcome   {outcome:?}"),
        None => println!("outcome   (unfinished)"),
    }
    println!();
    println!("{:<22} {:<18} {:<30} {:>8}", "NODE", "ACTION", "STATUS", "ATTEMPTS");
    for node in &record.plan.nodes {
        let rec = record.nodes.get(&node.node_id).cloned().unwrap_or_default();
        println!(
            "{:<22} {:<18} {:<30} {:>8}",
            node.node_id,
            node.action,
            format!("{:?}", rec.status),
            rec.attempts
        );
        if let Some(error) = &rec.error {
            println!("    error: {error}");
        }
    }
    Ok(())
}
