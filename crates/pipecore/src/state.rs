use crate::{AgentError, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bookkeeping field counting how many times the refinement agent has run.
pub const REFINEMENT_COUNT: &str = "refinement_count";

/// Bookkeeping field holding the refinement ceiling for the run.
pub const MAX_REFINEMENTS: &str = "max_refinements";

/// Fields managed by the engine itself; no agent may own them.
pub const RESERVED_FIELDS: &[&str] = &[REFINEMENT_COUNT, MAX_REFINEMENTS];

/// Named-field data bag threaded through one pipeline run.
///
/// Agents never mutate it directly. They receive a read-only snapshot
/// and return a [`StateDelta`] that the driver merges after the round.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    fields: BTreeMap<String, Value>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Get a field or fail with `MissingField`.
    pub fn require(&self, name: &str) -> Result<&Value, AgentError> {
        self.fields
            .get(name)
            .ok_or_else(|| AgentError::MissingField(name.to_string()))
    }

    pub fn require_str(&self, name: &str) -> Result<&str, AgentError> {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| type_mismatch(name, "string", value))
    }

    pub fn require_f64(&self, name: &str) -> Result<f64, AgentError> {
        let value = self.require(name)?;
        value.as_f64().ok_or_else(|| type_mismatch(name, "number", value))
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Merge a delta, overwriting any fields it carries.
    pub fn apply(&mut self, delta: StateDelta) {
        for (name, value) in delta.fields {
            tracing::trace!(field = %name, "merging state field");
            self.fields.insert(name, value);
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn refinement_count(&self) -> u64 {
        self.get(REFINEMENT_COUNT).and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn max_refinements(&self) -> u64 {
        self.get(MAX_REFINEMENTS).and_then(Value::as_u64).unwrap_or(0)
    }

    /// True while the refinement counter is below its ceiling.
    pub fn refinements_remaining(&self) -> bool {
        self.refinement_count() < self.max_refinements()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

fn type_mismatch(field: &str, expected: &str, actual: &Value) -> AgentError {
    AgentError::InvalidFieldType {
        field: field.to_string(),
        expected: expected.to_string(),
        actual: actual.type_name().to_string(),
    }
}

/// Fields produced by one agent execution.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    fields: BTreeMap<String, Value>,
}

impl StateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_overwrites_only_delta_fields() {
        let mut state = ExecutionState::new()
            .with_field("a", 1.0)
            .with_field("b", "keep");
        state.apply(StateDelta::new().with_field("a", 2.0));

        assert_eq!(state.get("a"), Some(&Value::Number(2.0)));
        assert_eq!(state.get("b").and_then(Value::as_str), Some("keep"));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn require_reports_missing_and_mistyped_fields() {
        let state = ExecutionState::new().with_field("score", "high");

        assert_eq!(
            state.require("absent"),
            Err(AgentError::MissingField("absent".to_string()))
        );
        assert_eq!(
            state.require_f64("score"),
            Err(AgentError::InvalidFieldType {
                field: "score".to_string(),
                expected: "number".to_string(),
                actual: "string".to_string(),
            })
        );
    }

    #[test]
    fn refinement_bookkeeping_defaults_to_exhausted() {
        let state = ExecutionState::new();
        assert_eq!(state.refinement_count(), 0);
        assert!(!state.refinements_remaining());

        let state = state.with_field(MAX_REFINEMENTS, 2u64);
        assert!(state.refinements_remaining());

        let state = state.with_field(REFINEMENT_COUNT, 2u64);
        assert!(!state.refinements_remaining());
    }
}
