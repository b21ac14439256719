//! Idempotency key derivation.
//!
//! Keys are UUIDv5 over `(plan id, action, projected inputs)`. `serde_json`
//! objects serialize with sorted keys, so equal inputs give equal keys
//! regardless of how they were built.

use infra_core::IdempotencyRule;
use serde_json::Value;
use uuid::Uuid;

const KEY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a7e_93d4_4b8e_a51f_0c3e_7d92_b640);

/// Key for a forward invocation.
pub fn derive_key(plan_id: Uuid, action: &str, rule: &IdempotencyRule, inputs: &Value) -> String {
    let projected = rule.select(inputs);
    let name = format!("{plan_id}\n{action}\n{projected}");
    Uuid::new_v5(&KEY_NAMESPACE, name.as_bytes()).to_string()
}

/// Key for compensating the invocation identified by `forward_key`.
pub fn derive_compensation_key(plan_id: Uuid, compensation: &str, forward_key: &str) -> String {
    let name = format!("{plan_id}\ncompensate:{compensation}\n{forward_key}");
    Uuid::new_v5(&KEY_NAMESPACE, name.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_ignores_field_order() {
        let plan = Uuid::new_v4();
        let a = json!({"from": 3, "to": 4, "target": "c1"});
        let b: Value = serde_json::from_str(r#"{"target":"c1","to":4,"from":3}"#).unwrap();
        let rule = IdempotencyRule::AllInputs;
        assert_eq!(derive_key(plan, "add_node", &rule, &a), derive_key(plan, "add_node", &rule, &b));
    }

    #[test]
    fn key_depends_on_plan_action_and_inputs() {
        let plan = Uuid::new_v4();
        let rule = IdempotencyRule::AllInputs;
        let inputs = json!({"to": 4});
        let key = derive_key(plan, "add_node", &rule, &inputs);
        assert_ne!(key, derive_key(Uuid::new_v4(), "add_node", &rule, &inputs));
        assert_ne!(key, derive_key(plan, "remove_node", &rule, &inputs));
        assert_ne!(key, derive_key(plan, "add_node", &rule, &json!({"to": 5})));
    }

    #[test]
    fn field_rule_ignores_other_inputs() {
        let plan = Uuid::new_v4();
        let rule = IdempotencyRule::Fields(vec!["to".into()]);
        assert_eq!(
            derive_key(plan, "add_node", &rule, &json!({"to": 4, "note": "a"})),
            derive_key(plan, "add_node", &rule, &json!({"to": 4, "note": "b"}))
        );
    }

    #[test]
    fn compensation_key_differs_from_forward_key() {
        let plan = Uuid::new_v4();
        let forward = derive_key(plan, "add_node", &IdempotencyRule::AllInputs, &json!({}));
        assert_ne!(forward, derive_compensation_key(plan, "remove_node", &forward));
    }
}
