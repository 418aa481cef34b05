//! Hook for delegating `mathOperator` / `mathConstant` to an external
//! computer algebra service.

use serde::{Deserialize, Serialize};

use crate::types::Value;

/// Failure reported by an [`EvaluationService`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CasError {
    /// The service could not be reached or has no capacity.
    #[error("service unavailable: {0}")]
    Unavailable(String),
    /// The service rejected or failed the request.
    #[error("cannot evaluate '{name}': {message}")]
    Evaluation { name: String, message: String },
}

/// What the evaluator does with a [`CasError`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasFailurePolicy {
    /// The expression evaluates to NULL and a warning is recorded.
    #[default]
    NullWithWarning,
    /// The current session operation fails with `EvalError::Cas`.
    Fatal,
}

/// Synchronous math evaluation service.
///
/// Arguments are already evaluated and checked numeric; `name` is the QTI
/// operator or constant name (`"sin"`, `"atan2"`, `"pi"`).
pub trait EvaluationService: Send + Sync {
    fn evaluate_math(&self, name: &str, args: &[Value]) -> Result<Value, CasError>;

    fn math_constant(&self, name: &str) -> Result<Value, CasError>;
}
