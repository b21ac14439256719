//! Command implementations and the argument parsers they share.

pub mod actions;
pub mod plan;
pub mod run;
pub mod serve;
pub mod status;

use anyhow::{Context, Result};
use infra_core::state::parse_scalar;
use infra_core::{Intent, ResourceState};
use infra_runtime::{Fault, SimulatedCluster};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Initial state for one simulated target.
#[derive(Debug, Clone)]
pub struct Seed {
    pub target: String,
    pub state: ResourceState,
}

/// A fault to inject into the simulated cluster.
#[derive(Debug, Clone)]
pub struct FaultArg {
    pub action: String,
    pub invocation: u32,
    pub permanent: bool,
}

impl FaultArg {
    pub fn to_fault(&self) -> Fault {
        if self.permanent {
            Fault::permanent(&self.action, self.invocation)
        } else {
            Fault::transient(&self.action, self.invocation)
        }
    }
}

/// `attribute=value`
pub fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected attribute=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty attribute in `{raw}`"));
    }
    Ok((key.to_string(), parse_scalar(value.trim())))
}

/// `target:attr=value,attr=value`
pub fn parse_seed(raw: &str) -> Result<Seed, String> {
    let (target, state) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected target:attribute=value, got `{raw}`"))?;
    let state: ResourceState = state.parse().map_err(|e| format!("{e}"))?;
    Ok(Seed {
        target: target.trim().to_string(),
        state,
    })
}

/// `action:invocation[:permanent]`
pub fn parse_fault(raw: &str) -> Result<FaultArg, String> {
    let mut parts = raw.split(':');
    let action = parts.next().unwrap_or_default().trim();
    if action.is_empty() {
        return Err(format!("missing action in `{raw}`"));
    }
    let invocation = parts
        .next()
        .ok_or_else(|| format!("missing invocation in `{raw}`"))?
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("bad invocation in `{raw}`: {e}"))?;
    let permanent = match parts.next().map(str::trim) {
        None | Some("transient") => false,
        Some("permanent") => true,
        Some(other) => return Err(format!("unknown fault kind `{other}`")),
    };
    Ok(FaultArg {
        action: action.to_string(),
        invocation,
        permanent,
    })
}

/// Read an intent from YAML (JSON is accepted as a YAML subset).
pub fn load_intent(path: &Path) -> Result<Intent> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read intent file {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("invalid intent in {}", path.display()))
}

/// A simulated cluster with the intent's target at the given state. Without
/// `--initial` the target starts empty.
pub fn seeded_cluster(intent: &Intent, initial: &[(String, Value)]) -> Arc<SimulatedCluster> {
    let cluster = Arc::new(SimulatedCluster::new());
    if !initial.is_empty() {
        let state = initial
            .iter()
            .fold(ResourceState::new(), |s, (k, v)| s.with(k.clone(), v.clone()));
        cluster.seed(intent.target.name.clone(), state);
    }
    cluster
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn assignment_parses_scalars() {
        assert_eq!(parse_assignment("scaled_to=3").unwrap(), ("scaled_to".into(), json!(3)));
        assert_eq!(
            parse_assignment("version = 1.4.2").unwrap(),
            ("version".into(), json!("1.4.2"))
        );
        assert!(parse_assignment("scaled_to").is_err());
        assert!(parse_assignment("=3").is_err());
    }

    #[test]
    fn seed_splits_target_from_state() {
        let seed = parse_seed("cache-cluster-1:scaled_to=3,healthy=false").unwrap();
        assert_eq!(seed.target, "cache-cluster-1");
        assert_eq!(seed.state.get("scaled_to"), Some(&json!(3)));
        assert_eq!(seed.state.get("healthy"), Some(&json!(false)));
        assert!(parse_seed("scaled_to=3").is_err());
    }

    #[test]
    fn fault_defaults_to_transient() {
        let fault = parse_fault("add_node:2").unwrap();
        assert_eq!(fault.action, "add_node");
        assert_eq!(fault.invocation, 2);
        assert!(!fault.permanent);
        assert!(parse_fault("add_node:2:permanent").unwrap().permanent);
        assert!(parse_fault("add_node:two").is_err());
        assert!(parse_fault("add_node:1:sometimes").is_err());
    }

    #[test]
    fn intent_file_accepts_compact_desired_state() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "target: cache-cluster-1\ndesired: scaled_to=6").unwrap();
        let intent = load_intent(file.path()).unwrap();
        assert_eq!(intent.target.name, "cache-cluster-1");
        assert_eq!(intent.desired.get("scaled_to"), Some(&json!(6)));
    }

    #[test]
    fn seeded_cluster_reports_initial_state() {
        let intent = Intent::new("c1", ResourceState::new().with("scaled_to", 5));
        let cluster = seeded_cluster(&intent, &[("scaled_to".into(), json!(2))]);
        assert_eq!(cluster.state_of("c1").unwrap().get("scaled_to"), Some(&json!(2)));
        assert_eq!(cluster.members("c1").len(), 2);
    }
}
