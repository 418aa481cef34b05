//! Runtime value types and assessment definitions for the QTI evaluator.
//!
//! The definition types here are built from package JSON by the
//! `from_interchange`/`parse_*` functions of each submodule. They are
//! immutable once built and may be shared across any number of sessions.

pub mod declarations;
pub mod expression;
pub mod item;
pub mod rules;
pub mod tables;
pub mod values;

pub use declarations::{DeclarationDetail, VariableDeclaration, VariableKind};
pub use expression::{
    Expression, ItemSubset, MathConstant, MathOperator, Operator, RoundingMode, StatsOperator,
    SubsetKind, ToleranceMode,
};
pub use item::{AssessmentItem, TemplateDefault};
pub use rules::{ConditionBranch, ExitKind, ProcessingRule, RuleScope, SetTarget};
pub use tables::{
    AreaMapEntry, AreaMapping, InterpolationTable, InterpolationTableEntry, LookupTable,
    MapEntry, Mapping, MatchTable, MatchTableEntry, Shape,
};
pub use test::{
    AssessmentItemRef, AssessmentSection, AssessmentTest, ItemSessionControl, NavigationMode,
    Ordering, SectionPart, Selection, SubmissionMode, TestFeedback, TestFeedbackAccess, TestPart,
    TimeLimits, Visibility,
};
pub use values::{value_to_json, BaseType, Cardinality, SingleValue, Value};

use crate::cas::CasError;

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

/// Errors that can occur while building definitions or running sessions.
///
/// Evaluation null propagation is never reported here: an operator given
/// operands it cannot use yields `Value::Null`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// Error deserializing package JSON.
    #[error("deserialization error: {message}")]
    DeserializeError { message: String },
    /// An expression, rule, operator or enumerated attribute name is unknown.
    #[error("unknown {kind} '{name}'")]
    UnknownName { kind: String, name: String },
    /// A variable is referenced that has no declaration in scope.
    #[error("unknown variable: {identifier}")]
    UnknownVariable { identifier: String },
    /// A value does not fit the declaration or accessor it was used with.
    #[error("type error: {message}")]
    TypeError { message: String },
    /// A session operation was called before `initialize`.
    #[error("session has not been initialized")]
    NotInitialized,
    /// `initialize` was called twice on the same session.
    #[error("session has already been initialized")]
    AlreadyInitialized,
    /// The requested operation is not allowed in the current session state.
    #[error("invalid session state: {message}")]
    InvalidState { message: String },
    /// A referenced document is not in the package.
    #[error("unknown document: {identifier}")]
    UnknownDocument { identifier: String },
    /// The configured computer algebra service failed under a fatal policy.
    #[error("computer algebra service failure: {0}")]
    Cas(CasError),
    /// A defect in the evaluator itself.
    #[error("internal evaluator error: {message}")]
    Internal { message: String },
    /// The package envelope could not be read.
    #[error(transparent)]
    Interchange(#[from] qti_interchange::InterchangeError),
}

impl EvalError {
    pub(crate) fn deserialize(message: impl Into<String>) -> Self {
        EvalError::DeserializeError {
            message: message.into(),
        }
    }

    pub(crate) fn unknown(kind: &str, name: &str) -> Self {
        EvalError::UnknownName {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }
}

// ──────────────────────────────────────────────
// Interchange JSON helpers
// ──────────────────────────────────────────────

pub(crate) fn get_str(obj: &serde_json::Value, field: &str) -> Result<String, EvalError> {
    obj.get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| EvalError::deserialize(format!("missing string field '{}'", field)))
}

pub(crate) fn opt_str(obj: &serde_json::Value, field: &str) -> Option<String> {
    obj.get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub(crate) fn opt_bool(obj: &serde_json::Value, field: &str, default: bool) -> bool {
    obj.get(field).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub(crate) fn opt_f64(obj: &serde_json::Value, field: &str) -> Option<f64> {
    obj.get(field).and_then(|v| v.as_f64())
}

pub(crate) fn opt_i64(obj: &serde_json::Value, field: &str) -> Option<i64> {
    obj.get(field).and_then(|v| v.as_i64())
}

/// Read an optional list of strings (absent means empty).
pub(crate) fn str_list(obj: &serde_json::Value, field: &str) -> Result<Vec<String>, EvalError> {
    match obj.get(field) {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Array(arr)) => arr
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| EvalError::deserialize(format!("'{}' must hold strings", field)))
            })
            .collect(),
        Some(serde_json::Value::String(s)) => {
            Ok(s.split_whitespace().map(|p| p.to_string()).collect())
        }
        Some(_) => Err(EvalError::deserialize(format!(
            "'{}' must be a list of strings",
            field
        ))),
    }
}

/// Read an optional array of JSON objects (absent means empty).
pub(crate) fn obj_list<'a>(
    obj: &'a serde_json::Value,
    field: &str,
) -> Result<&'a [serde_json::Value], EvalError> {
    match obj.get(field) {
        None | Some(serde_json::Value::Null) => Ok(&[]),
        Some(serde_json::Value::Array(arr)) => Ok(arr.as_slice()),
        Some(_) => Err(EvalError::deserialize(format!(
            "'{}' must be an array",
            field
        ))),
    }
}
