//! Current-state lookup for planning targets.

use crate::error::InventoryError;
use async_trait::async_trait;
use infra_core::{ResourceState, TargetResource};
use std::collections::HashMap;
use std::sync::RwLock;

/// Returns the current state of a target resource.
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn current_state(&self, target: &TargetResource) -> Result<ResourceState, InventoryError>;
}

/// Fixed states keyed by target name.
#[derive(Debug, Default)]
pub struct StaticInventory {
    states: RwLock<HashMap<String, ResourceState>>,
}

impl StaticInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, target: impl Into<String>, state: ResourceState) -> Self {
        self.set(target, state);
        self
    }

    pub fn set(&self, target: impl Into<String>, state: ResourceState) {
        if let Ok(mut states) = self.states.write() {
            states.insert(target.into(), state);
        }
    }
}

#[async_trait]
impl Inventory for StaticInventory {
    async fn current_state(&self, target: &TargetResource) -> Result<ResourceState, InventoryError> {
        let states = self
            .states
            .read()
            .map_err(|e| InventoryError::Unavailable(e.to_string()))?;
        states
            .get(&target.name)
            .cloned()
            .ok_or_else(|| InventoryError::UnknownTarget(target.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_seeded_state() {
        let inventory = StaticInventory::new().with("c1", ResourceState::new().with("scaled_to", 3));
        let state = inventory.current_state(&"c1".into()).await.unwrap();
        assert_eq!(state.get("scaled_to"), Some(&serde_json::json!(3)));
        assert_eq!(
            inventory.current_state(&"c2".into()).await.unwrap_err(),
            InventoryError::UnknownTarget("c2".into())
        );
    }
}
