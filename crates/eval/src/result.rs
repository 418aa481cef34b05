//! Serializable item, test and assessment results.

use serde::Serialize;

use crate::types::{value_to_json, Value, VariableDeclaration, VariableKind};

/// Current time as an RFC 3339 string.
pub(crate) fn date_stamp(at: time::OffsetDateTime) -> String {
    at.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Initial,
    PendingSubmission,
    Final,
}

/// One recorded variable binding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultVariable {
    pub identifier: String,
    pub kind: VariableKind,
    pub cardinality: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_type: Option<String>,
    pub value: serde_json::Value,
}

impl ResultVariable {
    pub fn new(declaration: &VariableDeclaration, value: &Value) -> Self {
        ResultVariable {
            identifier: declaration.identifier.clone(),
            kind: declaration.kind(),
            cardinality: declaration.cardinality.name().to_string(),
            base_type: declaration.base_type.map(|b| b.name().to_string()),
            value: value_to_json(value),
        }
    }

    /// Duration outcome of a test part or section, in seconds.
    pub fn duration(identifier: String, seconds: f64) -> Self {
        ResultVariable {
            identifier,
            kind: VariableKind::Outcome,
            cardinality: "single".to_string(),
            base_type: Some("float".to_string()),
            value: value_to_json(&Value::float(seconds)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub identifier: String,
    /// Position of the item instance in the test plan, from 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_index: Option<usize>,
    pub date_stamp: String,
    pub session_status: SessionStatus,
    pub variables: Vec<ResultVariable>,
}

impl ItemResult {
    pub fn variable(&self, identifier: &str) -> Option<&ResultVariable> {
        self.variables.iter().find(|v| v.identifier == identifier)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub identifier: String,
    pub date_stamp: String,
    pub variables: Vec<ResultVariable>,
}

impl TestResult {
    pub fn variable(&self, identifier: &str) -> Option<&ResultVariable> {
        self.variables.iter().find(|v| v.identifier == identifier)
    }
}

/// Everything recorded about one candidate's run through a test.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentResult {
    pub date_stamp: String,
    pub test_result: TestResult,
    pub item_results: Vec<ItemResult>,
}
