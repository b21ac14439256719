//! The action capability interface.

use crate::error::ActionError;
use async_trait::async_trait;
use infra_core::{ActionDefinition, TargetResource};
use serde_json::Value;
use uuid::Uuid;

/// Everything an action learns about the invocation besides its inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationContext {
    pub plan_id: Uuid,
    pub node_id: String,
    pub target: TargetResource,
    /// Identical for every attempt of the same invocation. Implementations
    /// must apply their effect at most once per key.
    pub idempotency_key: String,
    /// 1-based, counted across resumed runs.
    pub attempt: u32,
}

/// A registered, idempotent capability.
#[async_trait]
pub trait Action: Send + Sync {
    fn definition(&self) -> &ActionDefinition;

    /// Apply the action and return its declared outputs.
    async fn invoke(&self, ctx: &InvocationContext, inputs: &Value) -> Result<Value, ActionError>;

    /// Undo a succeeded invocation of the action this one compensates.
    ///
    /// The default invokes this action with the undone invocation's outputs
    /// merged over its inputs.
    async fn compensate(
        &self,
        ctx: &InvocationContext,
        inputs: &Value,
        outputs: &Value,
    ) -> Result<Value, ActionError> {
        let merged = merge_objects(inputs, outputs);
        self.invoke(ctx, &merged).await
    }
}

/// Shallow merge of two JSON objects; keys in `overlay` win. Non-objects are
/// treated as empty.
pub fn merge_objects(base: &Value, overlay: &Value) -> Value {
    let mut merged = base.as_object().cloned().unwrap_or_default();
    if let Some(extra) = overlay.as_object() {
        for (k, v) in extra {
            merged.insert(k.clone(), v.clone());
        }
    }
    Value::Object(merged)
}
