//! Error types for the runtime crate.

use infra_core::ConfigError;
use infra_planner::PlanError;
use infra_report::ReportError;
use infra_state::StateError;
use thiserror::Error;
use uuid::Uuid;

/// Failure reported by an action invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// May succeed if tried again.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Will fail the same way every time.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Inputs did not match the action's schema or could not be resolved.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ActionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Registry misuse. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("action {name}@{version} is already registered")]
    DuplicateAction { name: String, version: String },

    #[error("unknown action: {name}{}", .version.as_ref().map(|v| format!("@{v}")).unwrap_or_default())]
    UnknownAction {
        name: String,
        version: Option<String>,
    },

    #[error("action {0} cannot compensate itself")]
    SelfCompensation(String),

    #[error("action {action} is compensated by unregistered action {compensation}")]
    UnknownCompensation { action: String, compensation: String },

    #[error("action {action} has an invalid input schema: {reason}")]
    InvalidSchema { action: String, reason: String },
}

/// Errors raised while executing or compensating a plan.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The action failed after exhausting its retries, or failed permanently.
    #[error("node {node_id} ({action}) failed: {source}")]
    ActionInvocation {
        node_id: String,
        action: String,
        #[source]
        source: ActionError,
    },

    #[error("node {node_id} ({action}) timed out after {timeout_ms}ms")]
    ActionTimeout {
        node_id: String,
        action: String,
        timeout_ms: u64,
    },

    /// The State Tracker could not record a transition. Aborts the run.
    #[error("state tracker unavailable: {0}")]
    PersistenceUnavailable(#[from] StateError),

    #[error("node {0} succeeded but declares no compensation")]
    UncompensatedFailure(String),

    #[error("compensation of node {node_id} exhausted its retries: {reason}")]
    ManualInterventionRequired { node_id: String, reason: String },
}

impl ExecutionError {
    /// Retry policy applies to transient failures and timeouts only.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ActionInvocation { source, .. } => source.is_retryable(),
            Self::ActionTimeout { .. } => true,
            _ => false,
        }
    }
}

/// Errors from an [`Inventory`](crate::Inventory).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("inventory unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the [`Agent`](crate::Agent) facade.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unknown plan: {0}")]
    UnknownPlan(Uuid),
}
