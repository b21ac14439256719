//! Attribute maps describing the state of a target resource.
//!
//! The same type carries both the current state reported by an inventory
//! and the desired end-state of an intent. Besides a YAML/JSON map it
//! accepts the compact textual form `"scaled_to=6,version=1.4.2"`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when the textual state form cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateParseError {
    #[error("expected `attribute=value`, got `{0}`")]
    MissingSeparator(String),

    #[error("empty attribute name in `{0}`")]
    EmptyAttribute(String),
}

/// Attribute → value map, ordered by attribute name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StateRepr")]
pub struct ResourceState(BTreeMap<String, Value>);

#[derive(Deserialize)]
#[serde(untagged)]
enum StateRepr {
    Text(String),
    Map(BTreeMap<String, Value>),
}

impl TryFrom<StateRepr> for ResourceState {
    type Error = StateParseError;

    fn try_from(repr: StateRepr) -> Result<Self, Self::Error> {
        match repr {
            StateRepr::Text(s) => s.parse(),
            StateRepr::Map(m) => Ok(Self(m)),
        }
    }
}

impl FromStr for ResourceState {
    type Err = StateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut map = BTreeMap::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, raw) = pair
                .split_once('=')
                .ok_or_else(|| StateParseError::MissingSeparator(pair.to_string()))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(StateParseError::EmptyAttribute(pair.to_string()));
            }
            map.insert(key.to_string(), parse_scalar(raw.trim()));
        }
        Ok(Self(map))
    }
}

/// Parse a textual scalar into the narrowest JSON value it represents.
pub fn parse_scalar(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

/// Loose equality: numbers compare by value, so `6` equals `6.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

impl ResourceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(attribute.into(), value.into());
        self
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.0.get(attribute)
    }

    pub fn set(&mut self, attribute: impl Into<String>, value: Value) {
        self.0.insert(attribute.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when every attribute of `desired` is present here with an equal value.
    pub fn satisfies(&self, desired: &ResourceState) -> bool {
        desired
            .iter()
            .all(|(k, v)| self.get(k).is_some_and(|have| values_equal(have, v)))
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl From<BTreeMap<String, Value>> for ResourceState {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{}={}", k, s),
                other => format!("{}={}", k, other),
            })
            .collect();
        write!(f, "{}", parts.join(","))
    }
}
