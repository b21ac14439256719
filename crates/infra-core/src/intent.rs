//! Operational intents: a desired end-state for one target resource.

use crate::state::ResourceState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Caller-supplied desired end-state for a target resource.
///
/// Immutable once accepted; the planner and executor only ever borrow it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(default = "new_intent_id")]
    pub intent_id: String,

    pub target: TargetResource,

    /// Desired attribute values, e.g. `{scaled_to: 6}` or `"scaled_to=6"`.
    pub desired: ResourceState,

    /// Correlates the intent with its origin (alert fingerprint, ticket id).
    #[serde(default = "new_correlation_id")]
    pub correlation_id: String,
}

impl Intent {
    pub fn new(target: impl Into<TargetResource>, desired: ResourceState) -> Self {
        Self {
            intent_id: new_intent_id(),
            target: target.into(),
            desired,
            correlation_id: new_correlation_id(),
        }
    }

    pub fn with_id(mut self, intent_id: impl Into<String>) -> Self {
        self.intent_id = intent_id.into();
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

/// Description of the resource an intent acts on.
///
/// Deserializes from a bare name (`"cache-cluster-1"`) or a full object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TargetRepr")]
pub struct TargetResource {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Free-form attributes (namespace, region, ...).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub attrs: Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TargetRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        kind: Option<String>,
        #[serde(default)]
        attrs: Value,
    },
}

impl From<TargetRepr> for TargetResource {
    fn from(repr: TargetRepr) -> Self {
        match repr {
            TargetRepr::Name(name) => Self::named(name),
            TargetRepr::Full { name, kind, attrs } => Self { name, kind, attrs },
        }
    }
}

impl TargetResource {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            attrs: Value::Null,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}

impl From<&str> for TargetResource {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<String> for TargetResource {
    fn from(name: String) -> Self {
        Self::named(name)
    }
}

impl fmt::Display for TargetResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Some(kind) => write!(f, "{}/{}", kind, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

fn new_intent_id() -> String {
    format!("intent-{}", Uuid::new_v4())
}

fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}
