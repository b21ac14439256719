//! Planning errors. No side effects have happened when one is returned.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// No action sequence moves the current state toward the desired state.
    #[error("intent {intent_id} cannot be planned: {reason}")]
    UnplannableIntent { intent_id: String, reason: String },

    /// Declared action ordering (`after`) forms a cycle.
    #[error("cyclic dependency between actions: {}", .actions.join(" -> "))]
    CyclicDependency { actions: Vec<String> },
}
