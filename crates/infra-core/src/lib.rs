//! # infra-core
//!
//! Shared types for the infra-agent workspace: intents, action definitions,
//! plans, per-node lifecycle statuses and the execution record, plus the
//! agent configuration loaded from `infra-agent.yaml`.

// Configuration types shared across all infra-agent crates
pub mod config;

pub mod action;
pub mod intent;
pub mod plan;
pub mod record;
pub mod state;

pub use action::{ActionDefinition, Condition, Effect, IdempotencyRule, OutputBinding};
pub use config::{
    AgentConfig, ConfigError, ExecutorConfig, GrafanaWebhookConfig, LogFormat, LoggingConfig,
    PlannerConfig, ReportSinkKind, ReportingConfig, RetryConfig, ServerConfig, StateBackend,
    StateConfig, WebhooksConfig,
};
pub use intent::{Intent, TargetResource};
pub use plan::{NodeStatus, OUTPUT_REF_KEY, Plan, PlanNode, PlanOutcome, as_output_ref, output_ref};
pub use record::{ExecutionRecord, NodeRecord};
pub use state::{ResourceState, StateParseError};
