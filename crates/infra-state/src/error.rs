//! Error types for the state crate.

use infra_core::NodeStatus;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while recording or loading execution state.
#[derive(Debug, Error)]
pub enum StateError {
    /// The durable store could not complete a read or write.
    #[error("state store unavailable: {0}")]
    Persistence(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A journal could not be replayed.
    #[error("journal for plan {plan_id} is corrupt: {reason}")]
    Corrupt { plan_id: Uuid, reason: String },

    #[error("unknown plan: {0}")]
    UnknownPlan(Uuid),

    #[error("plan {plan_id} has no node {node_id}")]
    UnknownNode { plan_id: Uuid, node_id: String },

    /// A status change that would move a node backwards.
    #[error("plan {plan_id} node {node_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        plan_id: Uuid,
        node_id: String,
        from: NodeStatus,
        to: NodeStatus,
    },

    #[error("plan {0} already finished")]
    AlreadyFinished(Uuid),
}
