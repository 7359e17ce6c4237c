//! State schema and merge rules.
//!
//! Execution state is a JSON object whose fields each carry a declared
//! merge rule. When a node returns updates, the schema merges them into
//! the previous state with a pure function: the old state is never
//! mutated, every transition produces a new value.
//!
//! Two built-in reducers cover the engine's needs:
//!
//! | Reducer | Behavior | Use |
//! |---------|----------|-----|
//! | [`ReplaceReducer`] | new value overwrites old | scalars, plan, blocker |
//! | [`AppendReducer`] | new list concatenated to old | messages, results, usage |
//!
//! Fields without a declared rule default to replace.

use crate::error::{GraphError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Merge rule for a single state field.
pub trait Reducer: Send + Sync {
    /// Combine the current value with an update, producing the new value.
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value>;

    /// Rule name, for diagnostics.
    fn name(&self) -> &'static str;
}

/// Last write wins.
pub struct ReplaceReducer;

impl Reducer for ReplaceReducer {
    fn reduce(&self, _current: &Value, update: &Value) -> Result<Value> {
        Ok(update.clone())
    }

    fn name(&self) -> &'static str {
        "replace"
    }
}

/// Concatenate the update list onto the current list.
///
/// A missing or null current value behaves as an empty list. Both sides
/// must be arrays; anything else is a merge error.
pub struct AppendReducer;

impl Reducer for AppendReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        let update_items = update.as_array().ok_or_else(|| {
            GraphError::State(format!("append update must be an array, got {}", update))
        })?;

        let mut items = match current {
            Value::Null => Vec::new(),
            Value::Array(existing) => existing.clone(),
            other => {
                return Err(GraphError::State(format!(
                    "append target must be an array, got {}",
                    other
                )))
            }
        };
        items.extend(update_items.iter().cloned());
        Ok(Value::Array(items))
    }

    fn name(&self) -> &'static str {
        "append"
    }
}

/// Declared merge rules for the fields of an execution state.
pub struct StateSchema {
    fields: HashMap<String, Box<dyn Reducer>>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
        }
    }

    /// Declare the merge rule for a field. Undeclared fields replace.
    pub fn add_field(&mut self, name: impl Into<String>, reducer: Box<dyn Reducer>) -> &mut Self {
        self.fields.insert(name.into(), reducer);
        self
    }

    /// Rule name for a field, for diagnostics.
    pub fn rule_for(&self, field: &str) -> &'static str {
        self.fields.get(field).map(|r| r.name()).unwrap_or("replace")
    }

    /// Merge `updates` into `old`, producing a new state value.
    ///
    /// `old` must be a JSON object or null; `updates` must be a JSON
    /// object. Fields absent from `updates` pass through unchanged.
    pub fn merge(&self, old: &Value, updates: &Value) -> Result<Value> {
        let mut merged: Map<String, Value> = match old {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(GraphError::State(format!(
                    "state must be an object, got {}",
                    other
                )))
            }
        };

        let update_map = updates.as_object().ok_or_else(|| {
            GraphError::State(format!("state updates must be an object, got {}", updates))
        })?;

        for (key, update) in update_map {
            let current = merged.get(key).cloned().unwrap_or(Value::Null);
            let new_value = match self.fields.get(key) {
                Some(reducer) => reducer.reduce(&current, update)?,
                None => update.clone(),
            };
            merged.insert(key.clone(), new_value);
        }

        Ok(Value::Object(merged))
    }
}

impl Default for StateSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fields: Vec<(&str, &'static str)> = self
            .fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.name()))
            .collect();
        fields.sort();
        f.debug_struct("StateSchema").field("fields", &fields).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> StateSchema {
        let mut schema = StateSchema::new();
        schema.add_field("messages", Box::new(AppendReducer));
        schema.add_field("status", Box::new(ReplaceReducer));
        schema
    }

    #[test]
    fn replace_overwrites() {
        let schema = schema();
        let old = json!({"status": "thinking", "messages": []});
        let merged = schema.merge(&old, &json!({"status": "done"})).unwrap();
        assert_eq!(merged["status"], "done");
        // untouched fields pass through
        assert_eq!(merged["messages"], json!([]));
    }

    #[test]
    fn append_concatenates() {
        let schema = schema();
        let old = json!({"messages": ["a"]});
        let merged = schema.merge(&old, &json!({"messages": ["b", "c"]})).unwrap();
        assert_eq!(merged["messages"], json!(["a", "b", "c"]));
    }

    #[test]
    fn append_to_missing_field_starts_empty() {
        let schema = schema();
        let merged = schema.merge(&json!({}), &json!({"messages": ["a"]})).unwrap();
        assert_eq!(merged["messages"], json!(["a"]));
    }

    #[test]
    fn append_rejects_non_array_update() {
        let schema = schema();
        let err = schema.merge(&json!({}), &json!({"messages": "oops"})).unwrap_err();
        assert!(matches!(err, GraphError::State(_)));
    }

    #[test]
    fn undeclared_field_replaces() {
        let schema = schema();
        let old = json!({"batch_index": 0});
        let merged = schema.merge(&old, &json!({"batch_index": 1})).unwrap();
        assert_eq!(merged["batch_index"], 1);
    }

    #[test]
    fn null_update_clears_replace_field() {
        let schema = schema();
        let old = json!({"blocker": {"step_id": "s1"}});
        let merged = schema.merge(&old, &json!({"blocker": null})).unwrap();
        assert_eq!(merged["blocker"], Value::Null);
    }

    #[test]
    fn merge_is_pure() {
        let schema = schema();
        let old = json!({"messages": ["a"]});
        let _ = schema.merge(&old, &json!({"messages": ["b"]})).unwrap();
        assert_eq!(old, json!({"messages": ["a"]}));
    }

    #[test]
    fn null_old_state_treated_as_empty() {
        let schema = schema();
        let merged = schema.merge(&Value::Null, &json!({"status": "new"})).unwrap();
        assert_eq!(merged, json!({"status": "new"}));
    }
}
