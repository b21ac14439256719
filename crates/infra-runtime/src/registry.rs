//! The Action Registry.
//!
//! Built once at startup and shared behind an `Arc`; every method after
//! construction takes `&self`, so concurrent lookups need no locking.

use crate::action::Action;
use crate::error::{ActionError, RegistryError};
use infra_core::ActionDefinition;
use infra_planner::ActionCatalog;
use jsonschema::Validator;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

struct Registered {
    action: Arc<dyn Action>,
    validator: Option<Validator>,
}

/// Catalog of registered actions, in declaration order.
#[derive(Default)]
pub struct ActionRegistry {
    entries: Vec<Registered>,
    by_key: HashMap<(String, String), usize>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. Fails if the same name and version already exist,
    /// if it names itself as compensation, or if its input schema does not
    /// compile.
    pub fn register(&mut self, action: Arc<dyn Action>) -> Result<(), RegistryError> {
        let def = action.definition();
        let key = (def.name.clone(), def.version.clone());
        if self.by_key.contains_key(&key) {
            return Err(RegistryError::DuplicateAction {
                name: def.name.clone(),
                version: def.version.clone(),
            });
        }
        if def.compensation.as_deref() == Some(def.name.as_str()) {
            return Err(RegistryError::SelfCompensation(def.name.clone()));
        }

        let validator = if schema_is_empty(&def.input_schema) {
            None
        } else {
            let compiled = jsonschema::validator_for(&def.input_schema).map_err(|e| {
                RegistryError::InvalidSchema {
                    action: def.qualified_name(),
                    reason: e.to_string(),
                }
            })?;
            Some(compiled)
        };

        tracing::debug!(action = %def.qualified_name(), "Registered action");
        self.by_key.insert(key, self.entries.len());
        self.entries.push(Registered { action, validator });
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, action: Arc<dyn Action>) -> Result<Self, RegistryError> {
        self.register(action)?;
        Ok(self)
    }

    /// Look up an action. Without a version, the most recently registered
    /// version of that name wins.
    pub fn resolve(&self, name: &str, version: Option<&str>) -> Result<Arc<dyn Action>, RegistryError> {
        self.entry(name, version)
            .map(|e| Arc::clone(&e.action))
            .ok_or_else(|| RegistryError::UnknownAction {
                name: name.to_string(),
                version: version.map(str::to_string),
            })
    }

    /// Every definition, in declaration order.
    pub fn definitions(&self) -> Vec<&ActionDefinition> {
        self.entries.iter().map(|e| e.action.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check resolved inputs against the action's input schema.
    pub fn validate_inputs(
        &self,
        name: &str,
        version: Option<&str>,
        inputs: &Value,
    ) -> Result<(), ActionError> {
        let Some(entry) = self.entry(name, version) else {
            return Err(ActionError::Permanent(format!("unknown action {name}")));
        };
        let Some(validator) = &entry.validator else {
            return Ok(());
        };
        let errors: Vec<String> = validator
            .iter_errors(inputs)
            .take(10)
            .map(|e| {
                let path = e.instance_path().to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ActionError::InvalidInput(errors.join("; ")))
        }
    }

    /// Every declared compensation must name a registered action.
    pub fn verify_compensations(&self) -> Result<(), RegistryError> {
        for def in self.definitions() {
            if let Some(comp) = &def.compensation {
                if self.entry(comp, None).is_none() {
                    return Err(RegistryError::UnknownCompensation {
                        action: def.qualified_name(),
                        compensation: comp.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn entry(&self, name: &str, version: Option<&str>) -> Option<&Registered> {
        match version {
            Some(v) => self
                .by_key
                .get(&(name.to_string(), v.to_string()))
                .map(|i| &self.entries[*i]),
            None => self
                .entries
                .iter()
                .rev()
                .find(|e| e.action.definition().name == name),
        }
    }
}

impl ActionCatalog for ActionRegistry {
    fn definitions(&self) -> Vec<&ActionDefinition> {
        ActionRegistry::definitions(self)
    }
}

fn schema_is_empty(schema: &Value) -> bool {
    match schema {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
