//! Action definitions: the declarative half of a registered capability.
//!
//! The executable half (`invoke` / `compensate`) lives behind the `Action`
//! trait in `infra-runtime`; the planner only ever needs what is declared
//! here.

use crate::state::{ResourceState, values_equal};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Catalog entry for an executable infrastructure action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for the resolved inputs (enforced before invocation).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input_schema: Value,

    /// Output fields the action promises to return.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,

    /// Conditions on resource state that must hold before the action runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preconditions: Vec<Condition>,

    /// How the action changes resource state.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<Effect>,

    /// Actions that must precede this one when both appear in a plan.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,

    /// Inputs taken from the output of an earlier invocation in the same plan.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumes: Vec<OutputBinding>,

    /// Name of the registered action that undoes this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<String>,

    #[serde(default)]
    pub idempotency: IdempotencyRule,

    #[serde(default = "default_true")]
    pub retryable: bool,

    /// Per-attempt timeout; falls back to `executor.default_timeout_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// A condition on one attribute of the resource state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Equals { attribute: String, value: Value },
    AtLeast { attribute: String, value: f64 },
    AtMost { attribute: String, value: f64 },
    Present { attribute: String },
}

impl Condition {
    pub fn attribute(&self) -> &str {
        match self {
            Self::Equals { attribute, .. }
            | Self::AtLeast { attribute, .. }
            | Self::AtMost { attribute, .. }
            | Self::Present { attribute } => attribute,
        }
    }

    pub fn holds(&self, state: &ResourceState) -> bool {
        let current = state.get(self.attribute());
        match self {
            Self::Equals { value, .. } => current.is_some_and(|c| values_equal(c, value)),
            Self::AtLeast { value, .. } => {
                current.and_then(Value::as_f64).is_some_and(|c| c >= *value)
            }
            Self::AtMost { value, .. } => {
                current.and_then(Value::as_f64).is_some_and(|c| c <= *value)
            }
            Self::Present { .. } => current.is_some_and(|c| !c.is_null()),
        }
    }
}

/// A declared change to the resource state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Effect {
    /// Sets the attribute to a fixed value.
    Set { attribute: String, value: Value },
    /// Sets the attribute to whatever value the invocation requests.
    Assign { attribute: String },
    /// Adds a signed step to a numeric attribute.
    Increment { attribute: String, by: i64 },
}

impl Effect {
    pub fn attribute(&self) -> &str {
        match self {
            Self::Set { attribute, .. }
            | Self::Assign { attribute }
            | Self::Increment { attribute, .. } => attribute,
        }
    }

    /// Apply the effect to a simulated state. `requested` is the target value
    /// of the invocation and only matters for [`Effect::Assign`].
    pub fn apply(&self, state: &mut ResourceState, requested: Option<&Value>) {
        match self {
            Self::Set { attribute, value } => state.set(attribute.clone(), value.clone()),
            Self::Assign { attribute } => {
                if let Some(v) = requested {
                    state.set(attribute.clone(), v.clone());
                }
            }
            Self::Increment { attribute, by } => {
                let current = state.get(attribute).and_then(Value::as_i64).unwrap_or(0);
                state.set(attribute.clone(), Value::from(current + by));
            }
        }
    }
}

/// Binds an input field to an output of the most recent earlier invocation
/// of `action` in the same plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBinding {
    pub input: String,
    pub action: String,
    pub output: String,
}

/// Which resolved inputs feed the idempotency key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyRule {
    #[default]
    AllInputs,
    Fields(Vec<String>),
}

impl IdempotencyRule {
    /// Project the inputs the key is derived from.
    pub fn select(&self, inputs: &Value) -> Value {
        match self {
            Self::AllInputs => inputs.clone(),
            Self::Fields(fields) => {
                let mut selected = serde_json::Map::new();
                for field in fields {
                    if let Some(v) = inputs.get(field) {
                        selected.insert(field.clone(), v.clone());
                    }
                }
                Value::Object(selected)
            }
        }
    }
}

impl ActionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: None,
            input_schema: Value::Null,
            outputs: Vec::new(),
            preconditions: Vec::new(),
            effects: Vec::new(),
            after: Vec::new(),
            consumes: Vec::new(),
            compensation: None,
            idempotency: IdempotencyRule::default(),
            retryable: true,
            timeout_ms: None,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn output(mut self, field: impl Into<String>) -> Self {
        self.outputs.push(field.into());
        self
    }

    pub fn requires(mut self, condition: Condition) -> Self {
        self.preconditions.push(condition);
        self
    }

    pub fn effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn increments(self, attribute: impl Into<String>, by: i64) -> Self {
        self.effect(Effect::Increment {
            attribute: attribute.into(),
            by,
        })
    }

    pub fn assigns(self, attribute: impl Into<String>) -> Self {
        self.effect(Effect::Assign {
            attribute: attribute.into(),
        })
    }

    pub fn sets(self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.effect(Effect::Set {
            attribute: attribute.into(),
            value: value.into(),
        })
    }

    pub fn after(mut self, action: impl Into<String>) -> Self {
        self.after.push(action.into());
        self
    }

    pub fn consumes(
        mut self,
        input: impl Into<String>,
        action: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.consumes.push(OutputBinding {
            input: input.into(),
            action: action.into(),
            output: output.into(),
        });
        self
    }

    pub fn compensated_by(mut self, action: impl Into<String>) -> Self {
        self.compensation = Some(action.into());
        self
    }

    pub fn idempotent_on(mut self, fields: &[&str]) -> Self {
        self.idempotency = IdempotencyRule::Fields(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Attributes this action writes.
    pub fn writes(&self) -> impl Iterator<Item = &str> {
        self.effects.iter().map(Effect::attribute)
    }

    /// Attributes this action reads through its preconditions.
    pub fn reads(&self) -> impl Iterator<Item = &str> {
        self.preconditions.iter().map(Condition::attribute)
    }

    pub fn preconditions_hold(&self, state: &ResourceState) -> bool {
        self.preconditions.iter().all(|c| c.holds(state))
    }

    /// `name@version`, used in logs and idempotency derivation.
    pub fn qualified_name(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

fn default_version() -> String {
    "1".to_string()
}

fn default_true() -> bool {
    true
}
