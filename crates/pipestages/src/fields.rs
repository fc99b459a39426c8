//! State fields written by the review stages

use pipecore::{AgentError, ExecutionState, Value};

/// Input document, seeded by the caller
pub const DOCUMENT: &str = "document";
pub const EXTRACTION: &str = "extraction";
pub const SENTIMENT: &str = "sentiment";
pub const RISK: &str = "risk";
pub const COMPLIANCE: &str = "compliance";
pub const SYNTHESIS: &str = "synthesis";
pub const CRITIQUE: &str = "critique";
pub const REPORT: &str = "report";

/// Read `field.key` from an object-valued field.
pub fn nested<'s>(state: &'s ExecutionState, field: &str, key: &str) -> Result<&'s Value, AgentError> {
    let object = state.require(field)?;
    object
        .get(key)
        .ok_or_else(|| AgentError::MissingField(format!("{}.{}", field, key)))
}

pub fn nested_f64(state: &ExecutionState, field: &str, key: &str) -> Result<f64, AgentError> {
    let value = nested(state, field, key)?;
    value.as_f64().ok_or_else(|| AgentError::InvalidFieldType {
        field: format!("{}.{}", field, key),
        expected: "number".to_string(),
        actual: value.type_name().to_string(),
    })
}

pub fn nested_str<'s>(state: &'s ExecutionState, field: &str, key: &str) -> Result<&'s str, AgentError> {
    let value = nested(state, field, key)?;
    value.as_str().ok_or_else(|| AgentError::InvalidFieldType {
        field: format!("{}.{}", field, key),
        expected: "string".to_string(),
        actual: value.type_name().to_string(),
    })
}

/// Strings in an array-valued `field.key`; empty when absent
pub fn nested_strings(state: &ExecutionState, field: &str, key: &str) -> Vec<String> {
    state
        .get(field)
        .and_then(|object| object.get(key))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_reads_report_the_dotted_path() {
        let state = ExecutionState::new().with_field(
            SENTIMENT,
            Value::object([("score", Value::from(0.5)), ("label", Value::from("positive"))]),
        );

        assert_eq!(nested_f64(&state, SENTIMENT, "score").unwrap(), 0.5);
        assert_eq!(nested_str(&state, SENTIMENT, "label").unwrap(), "positive");
        assert_eq!(
            nested_f64(&state, SENTIMENT, "label").unwrap_err(),
            AgentError::InvalidFieldType {
                field: "sentiment.label".to_string(),
                expected: "number".to_string(),
                actual: "string".to_string(),
            }
        );
        assert_eq!(
            nested_f64(&state, RISK, "score").unwrap_err(),
            AgentError::MissingField(RISK.to_string())
        );
        assert!(nested_strings(&state, RISK, "flags").is_empty());
    }
}
