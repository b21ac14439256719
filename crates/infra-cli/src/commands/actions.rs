//! `infra-agent actions` - list the registered actions.

use anyhow::Result;
use infra_runtime::SimulatedCluster;
use std::sync::Arc;

pub fn run(json: bool) -> Result<()> {
    let registry = Arc::new(SimulatedCluster::new()).registry()?;
    let definitions = registry.definitions();

    if json {
        println!("{}", serde_json::to_string_pretty(&definitions)?);
        return Ok(());
    }

    println!("{:<18} {:<8} {:<18} {:<9} DESCRIPTION", "ACTION", "VERSION", "COMPENSATION", "RETRY");
    for def in definitions {
        println!(
            "{:<18} {:<8} {:<18} {:<9} {}",
            def.name,
            def.version,
            def.compensation.as_deref().unwrap_or("-"),
            if def.retryable { "yes" } else { "no" },
            def.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
