//! Variable declarations: response, outcome and template variables.

use serde::Serialize;

use super::tables::{parse_area_mapping, parse_lookup_table, parse_mapping};
use super::tables::{AreaMapping, LookupTable, Mapping};
use super::values::{BaseType, Cardinality, SingleValue, Value};
use super::{get_str, opt_bool, opt_f64, opt_str, EvalError};

/// Built-in outcome holding the item's completion status.
pub const COMPLETION_STATUS: &str = "completionStatus";
/// Built-in response counting submitted attempts.
pub const NUM_ATTEMPTS: &str = "numAttempts";
/// Built-in response holding the accumulated duration in seconds.
pub const DURATION: &str = "duration";

pub const COMPLETION_UNKNOWN: &str = "unknown";
pub const COMPLETION_NOT_ATTEMPTED: &str = "not_attempted";
pub const COMPLETION_COMPLETED: &str = "completed";
pub const COMPLETION_INCOMPLETE: &str = "incomplete";

/// Which family a variable belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    Response,
    Outcome,
    Template,
}

impl VariableKind {
    pub fn name(&self) -> &'static str {
        match self {
            VariableKind::Response => "response",
            VariableKind::Outcome => "outcome",
            VariableKind::Template => "template",
        }
    }
}

/// Kind-specific parts of a declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum DeclarationDetail {
    Response {
        correct_response: Option<Value>,
        mapping: Option<Mapping>,
        area_mapping: Option<AreaMapping>,
    },
    Outcome {
        lookup_table: Option<LookupTable>,
        normal_maximum: Option<f64>,
        normal_minimum: Option<f64>,
        mastery_value: Option<f64>,
        interpretation: Option<String>,
    },
    Template {
        param_variable: bool,
        math_variable: bool,
    },
}

/// A variable declaration. Every value ever bound to the variable must
/// conform to its cardinality and base type.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclaration {
    pub identifier: String,
    pub cardinality: Cardinality,
    /// `None` only for record cardinality.
    pub base_type: Option<BaseType>,
    pub default_value: Option<Value>,
    pub detail: DeclarationDetail,
}

impl VariableDeclaration {
    pub fn kind(&self) -> VariableKind {
        match self.detail {
            DeclarationDetail::Response { .. } => VariableKind::Response,
            DeclarationDetail::Outcome { .. } => VariableKind::Outcome,
            DeclarationDetail::Template { .. } => VariableKind::Template,
        }
    }

    pub fn correct_response(&self) -> Option<&Value> {
        match &self.detail {
            DeclarationDetail::Response {
                correct_response, ..
            } => correct_response.as_ref(),
            _ => None,
        }
    }

    pub fn mapping(&self) -> Option<&Mapping> {
        match &self.detail {
            DeclarationDetail::Response { mapping, .. } => mapping.as_ref(),
            _ => None,
        }
    }

    pub fn area_mapping(&self) -> Option<&AreaMapping> {
        match &self.detail {
            DeclarationDetail::Response { area_mapping, .. } => area_mapping.as_ref(),
            _ => None,
        }
    }

    pub fn lookup_table(&self) -> Option<&LookupTable> {
        match &self.detail {
            DeclarationDetail::Outcome { lookup_table, .. } => lookup_table.as_ref(),
            _ => None,
        }
    }

    pub fn normal_maximum(&self) -> Option<f64> {
        match &self.detail {
            DeclarationDetail::Outcome { normal_maximum, .. } => *normal_maximum,
            _ => None,
        }
    }

    pub fn normal_minimum(&self) -> Option<f64> {
        match &self.detail {
            DeclarationDetail::Outcome { normal_minimum, .. } => *normal_minimum,
            _ => None,
        }
    }

    /// Whether `value` may be bound to this variable.
    pub fn accepts(&self, value: &Value) -> bool {
        value.conforms_to(self.cardinality, self.base_type)
    }

    /// Promote integer values to float for float variables; other values
    /// are returned unchanged.
    pub fn coerce(&self, value: Value) -> Value {
        if self.base_type != Some(BaseType::Float) || value.base_type() != Some(BaseType::Integer) {
            return value;
        }
        let promote = |v: SingleValue| match v {
            SingleValue::Integer(i) => SingleValue::Float(i as f64),
            other => other,
        };
        match value {
            Value::Single(v) => Value::Single(promote(v)),
            Value::Multiple { values, .. } => Value::Multiple {
                base_type: BaseType::Float,
                values: values.into_iter().map(promote).collect(),
            },
            Value::Ordered { values, .. } => Value::Ordered {
                base_type: BaseType::Float,
                values: values.into_iter().map(promote).collect(),
            },
            other => other,
        }
    }

    /// The declared default, or NULL.
    pub fn initial_value(&self) -> Value {
        self.default_value.clone().unwrap_or(Value::Null)
    }

    /// Built-in `completionStatus` outcome.
    pub fn completion_status() -> Self {
        VariableDeclaration {
            identifier: COMPLETION_STATUS.to_string(),
            cardinality: Cardinality::Single,
            base_type: Some(BaseType::Identifier),
            default_value: Some(Value::identifier(COMPLETION_NOT_ATTEMPTED)),
            detail: DeclarationDetail::Outcome {
                lookup_table: None,
                normal_maximum: None,
                normal_minimum: None,
                mastery_value: None,
                interpretation: None,
            },
        }
    }

    /// Built-in `numAttempts` response.
    pub fn num_attempts() -> Self {
        builtin_response(NUM_ATTEMPTS, BaseType::Integer, Value::integer(0))
    }

    /// Built-in `duration` response.
    pub fn duration() -> Self {
        builtin_response(DURATION, BaseType::Float, Value::float(0.0))
    }

    /// Built-in `duration` outcome of a test.
    pub fn test_duration() -> Self {
        VariableDeclaration {
            detail: DeclarationDetail::Outcome {
                lookup_table: None,
                normal_maximum: None,
                normal_minimum: None,
                mastery_value: None,
                interpretation: None,
            },
            ..builtin_response(DURATION, BaseType::Float, Value::float(0.0))
        }
    }
}

fn builtin_response(identifier: &str, base_type: BaseType, default: Value) -> VariableDeclaration {
    VariableDeclaration {
        identifier: identifier.to_string(),
        cardinality: Cardinality::Single,
        base_type: Some(base_type),
        default_value: Some(default),
        detail: DeclarationDetail::Response {
            correct_response: None,
            mapping: None,
            area_mapping: None,
        },
    }
}

/// Whether an identifier names one of the built-in variables.
pub fn is_builtin(identifier: &str) -> bool {
    matches!(identifier, COMPLETION_STATUS | NUM_ATTEMPTS | DURATION)
}

fn parse_optional_value(
    v: &serde_json::Value,
    field: &str,
    cardinality: Cardinality,
    base_type: Option<BaseType>,
    identifier: &str,
) -> Result<Option<Value>, EvalError> {
    match v.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(raw) => Value::from_json(cardinality, base_type, raw)
            .map(Some)
            .map_err(|e| {
                EvalError::deserialize(format!("{} of '{}': {}", field, identifier, e))
            }),
    }
}

/// Parse a declaration of the given kind from package JSON.
pub fn parse_declaration(
    v: &serde_json::Value,
    kind: VariableKind,
) -> Result<VariableDeclaration, EvalError> {
    let identifier = get_str(v, "identifier")?;
    let cardinality = Cardinality::parse(&get_str(v, "cardinality")?)?;
    let base_type = match opt_str(v, "baseType") {
        Some(bt) => Some(BaseType::parse(&bt)?),
        None if cardinality == Cardinality::Record => None,
        None => {
            return Err(EvalError::deserialize(format!(
                "declaration '{}' missing 'baseType'",
                identifier
            )))
        }
    };
    let default_value = parse_optional_value(v, "defaultValue", cardinality, base_type, &identifier)?;

    let detail = match kind {
        VariableKind::Response => DeclarationDetail::Response {
            correct_response: parse_optional_value(
                v,
                "correctResponse",
                cardinality,
                base_type,
                &identifier,
            )?,
            mapping: v
                .get("mapping")
                .map(|m| parse_mapping(m, base_type))
                .transpose()?,
            area_mapping: v.get("areaMapping").map(parse_area_mapping).transpose()?,
        },
        VariableKind::Outcome => DeclarationDetail::Outcome {
            lookup_table: v
                .get("lookupTable")
                .map(|t| parse_lookup_table(t, base_type))
                .transpose()?,
            normal_maximum: opt_f64(v, "normalMaximum"),
            normal_minimum: opt_f64(v, "normalMinimum"),
            mastery_value: opt_f64(v, "masteryValue"),
            interpretation: opt_str(v, "interpretation"),
        },
        VariableKind::Template => DeclarationDetail::Template {
            param_variable: opt_bool(v, "paramVariable", false),
            math_variable: opt_bool(v, "mathVariable", false),
        },
    };

    Ok(VariableDeclaration {
        identifier,
        cardinality,
        base_type,
        default_value,
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_response_declaration() {
        let d = parse_declaration(
            &json!({
                "identifier": "RESPONSE",
                "cardinality": "multiple",
                "baseType": "identifier",
                "correctResponse": ["A", "C"],
                "mapping": {"defaultValue": -1, "mapEntries": [{"mapKey": "A", "mappedValue": 2}]}
            }),
            VariableKind::Response,
        )
        .unwrap();
        assert_eq!(d.kind(), VariableKind::Response);
        assert_eq!(d.correct_response().map(|v| v.elements().len()), Some(2));
        assert_eq!(d.mapping().map(|m| m.default_value), Some(-1.0));
        assert!(d.area_mapping().is_none());
        assert!(d.initial_value().is_null());
    }

    #[test]
    fn parse_outcome_declaration() {
        let d = parse_declaration(
            &json!({
                "identifier": "SCORE",
                "cardinality": "single",
                "baseType": "float",
                "defaultValue": 0,
                "normalMaximum": 10.0
            }),
            VariableKind::Outcome,
        )
        .unwrap();
        assert_eq!(d.initial_value(), Value::float(0.0));
        assert_eq!(d.normal_maximum(), Some(10.0));
        assert_eq!(d.normal_minimum(), None);
    }

    #[test]
    fn missing_base_type_is_error_except_for_records() {
        assert!(parse_declaration(
            &json!({"identifier": "X", "cardinality": "single"}),
            VariableKind::Outcome
        )
        .is_err());
        let d = parse_declaration(
            &json!({"identifier": "R", "cardinality": "record"}),
            VariableKind::Outcome,
        )
        .unwrap();
        assert_eq!(d.base_type, None);
    }

    #[test]
    fn default_must_match_declaration() {
        let err = parse_declaration(
            &json!({"identifier": "N", "cardinality": "single", "baseType": "integer", "defaultValue": "x"}),
            VariableKind::Template,
        )
        .unwrap_err();
        assert!(err.to_string().contains("defaultValue of 'N'"));
    }

    #[test]
    fn builtins() {
        assert_eq!(
            VariableDeclaration::completion_status().initial_value(),
            Value::identifier(COMPLETION_NOT_ATTEMPTED)
        );
        assert_eq!(VariableDeclaration::num_attempts().kind(), VariableKind::Response);
        assert_eq!(VariableDeclaration::test_duration().kind(), VariableKind::Outcome);
        assert!(is_builtin("duration"));
        assert!(!is_builtin("SCORE"));
    }
}
