// Parameter Builder
// Walks an operation's raw parameter tree to extract or resolve references

use crate::reference::lexer::{extract_references, Reference};
use crate::reference::resolver::{ReferenceResolver, ResultSource};
use crate::reference::ReferenceError;

use serde_json::{Map, Value};

pub struct ParameterBuilder;

impl ParameterBuilder {
    /// Extraction mode: every reference in the tree, no result store needed
    pub fn extract(params: &Value) -> Vec<Reference> {
        let mut references = Vec::new();
        Self::visit_strings(params, &mut |text| {
            references.extend(extract_references(text))
        });
        references
    }

    /// Resolution mode: a new tree with every string leaf resolved
    pub fn resolve<S: ResultSource + ?Sized>(
        params: &Value,
        resolver: &ReferenceResolver<'_, S>,
    ) -> Result<Value, ReferenceError> {
        match params {
            Value::String(text) => resolver.resolve_str(text),
            Value::Array(items) => items
                .iter()
                .map(|item| Self::resolve(item, resolver))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut resolved = Map::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(key.clone(), Self::resolve(value, resolver)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    fn visit_strings<'v>(value: &'v Value, visit: &mut impl FnMut(&'v str)) {
        match value {
            Value::String(text) => visit(text),
            Value::Array(items) => items.iter().for_each(|item| Self::visit_strings(item, visit)),
            Value::Object(map) => map.values().for_each(|item| Self::visit_strings(item, visit)),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::models::OpKey;
    use serde_json::json;
    use std::collections::HashMap;

    fn params() -> Value {
        json!({
            "data": {
                "sprint_id": "{{tx-000.op-009.result.id}}",
                "task_id": "{{op-001.result.id}}",
                "tags": ["fixed", "{{op-001.result.name}}-copy"],
                "guestimate": 3,
                "meta": {"nested": {"deep": "{{op-001.result.meta}}"}}
            }
        })
    }

    #[test]
    fn test_extract_finds_nested_references() {
        let references = ParameterBuilder::extract(&params());
        assert_eq!(references.len(), 4);

        let targets: Vec<OpKey> = references.iter().map(|r| r.target("tx-001")).collect();
        assert!(targets.contains(&OpKey::new("tx-000", "op-009")));
        assert_eq!(
            targets.iter().filter(|t| **t == OpKey::new("tx-001", "op-001")).count(),
            3
        );
    }

    #[test]
    fn test_resolve_replaces_leaves() {
        let mut results = HashMap::new();
        results.insert(
            OpKey::new("tx-001", "op-001"),
            json!({"id": "T1", "name": "task", "meta": {"k": 1}}),
        );
        results.insert(OpKey::new("tx-000", "op-009"), json!({"id": "S1"}));

        let resolver = ReferenceResolver::new(&results, "tx-001");
        let resolved = ParameterBuilder::resolve(&params(), &resolver).unwrap();

        assert_eq!(
            resolved,
            json!({
                "data": {
                    "sprint_id": "S1",
                    "task_id": "T1",
                    "tags": ["fixed", "task-copy"],
                    "guestimate": 3,
                    "meta": {"nested": {"deep": {"k": 1}}}
                }
            })
        );
    }

    #[test]
    fn test_resolve_stops_at_first_error() {
        let results: HashMap<OpKey, Value> = HashMap::new();
        let resolver = ReferenceResolver::new(&results, "tx-001");
        let err = ParameterBuilder::resolve(&params(), &resolver).unwrap_err();
        assert!(matches!(err, ReferenceError::Unresolved { .. }));
    }

    #[test]
    fn test_keys_are_not_scanned() {
        let value = json!({"{{op.result.id}}": 1});
        assert!(ParameterBuilder::extract(&value).is_empty());
    }
}
