//! The planner's read-only view of the action registry.

use infra_core::ActionDefinition;

/// Source of action definitions, in declaration order.
pub trait ActionCatalog {
    fn definitions(&self) -> Vec<&ActionDefinition>;
}

impl ActionCatalog for [ActionDefinition] {
    fn definitions(&self) -> Vec<&ActionDefinition> {
        self.iter().collect()
    }
}

impl ActionCatalog for Vec<ActionDefinition> {
    fn definitions(&self) -> Vec<&ActionDefinition> {
        self.iter().collect()
    }
}
