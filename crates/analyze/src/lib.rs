//! QTI package validator -- V1-V4 static checks with structured output.
//!
//! The validator consumes the same interchange JSON as qti-eval and
//! builds its documents with the runtime's constructors. Each pass is a
//! separate module returning a list of `ValidationItem`s; `validate()`
//! runs all of them and aggregates the items into a `ValidationResult`.

pub mod package;
pub mod report;
pub mod v1_declarations;
pub mod v2_expressions;
pub mod v3_rules;
pub mod v4_test_structure;

mod walk;

pub use package::{AnalysisError, Document, Lookup, RejectedDocument, ValidationPackage};
pub use report::{Severity, ValidationItem, ValidationResult};

/// Pass names in execution order.
pub const PASSES: [&str; 4] = ["v1", "v2", "v3", "v4"];

/// Pass name used for documents that could not be built.
pub const LOAD_PASS: &str = "load";

/// Run the full V1-V4 suite on an interchange JSON package.
pub fn validate(package: &serde_json::Value) -> Result<ValidationResult, AnalysisError> {
    validate_selected(package, &PASSES)
}

/// Run only the named passes. Valid names: "v1", "v2", "v3", "v4".
/// Passes always run in their fixed order whatever the order given.
pub fn validate_selected(
    package: &serde_json::Value,
    passes: &[&str],
) -> Result<ValidationResult, AnalysisError> {
    if let Some(unknown) = passes.iter().find(|p| !PASSES.contains(*p)) {
        return Err(AnalysisError::UnknownPass(unknown.to_string()));
    }
    let package = ValidationPackage::from_interchange(package)?;
    Ok(validate_package(&package, passes))
}

/// Run the named passes on an already built package. Unknown names are
/// ignored.
pub fn validate_package(package: &ValidationPackage, passes: &[&str]) -> ValidationResult {
    let mut result = ValidationResult::new();
    for rejected in &package.rejected {
        result.push(ValidationItem::error(
            LOAD_PASS,
            rejected.identifier.as_str(),
            rejected.error.to_string(),
        ));
    }

    for pass in PASSES.iter().filter(|p| passes.contains(*p)) {
        let items = match *pass {
            "v1" => v1_declarations::check_declarations(package),
            "v2" => v2_expressions::check_expressions(package),
            "v3" => v3_rules::check_rules(package),
            _ => v4_test_structure::check_test_structure(package),
        };
        tracing::debug!(pass = *pass, items = items.len(), "validation pass finished");
        result.record(pass, items);
    }

    let (errors, warnings, infos) = result.counts();
    tracing::debug!(
        package = %package.id,
        errors,
        warnings,
        infos,
        "validation finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_test_package() -> serde_json::Value {
        json!({
            "id": "pkg",
            "documents": [
                {
                    "kind": "AssessmentItem",
                    "identifier": "q1",
                    "responseDeclarations": [
                        {"identifier": "RESPONSE", "cardinality": "single", "baseType": "identifier",
                         "correctResponse": "A"}
                    ],
                    "outcomeDeclarations": [
                        {"identifier": "SCORE", "cardinality": "single", "baseType": "float"}
                    ],
                    "responseProcessing": [{
                        "rule": "responseCondition",
                        "if": {
                            "expression": {"expr": "match", "args": [
                                {"expr": "variable", "identifier": "RESPONSE"},
                                {"expr": "correct", "identifier": "RESPONSE"}
                            ]},
                            "rules": [{"rule": "setOutcomeValue", "identifier": "SCORE",
                                       "expression": {"expr": "baseValue", "baseType": "float", "value": 1.0}}]
                        }
                    }]
                }
            ]
        })
    }

    #[test]
    fn test_validate_runs_all_passes() {
        let result = validate(&make_test_package()).unwrap();
        assert_eq!(result.passes_run, vec!["v1", "v2", "v3", "v4"]);
        assert!(!result.has_errors(), "unexpected: {:?}", result.items);
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_validate_selected_runs_in_fixed_order() {
        let result = validate_selected(&make_test_package(), &["v3", "v1"]).unwrap();
        assert_eq!(result.passes_run, vec!["v1", "v3"]);
    }

    #[test]
    fn test_unknown_pass_is_rejected() {
        let err = validate_selected(&make_test_package(), &["s1"]).unwrap_err();
        assert_eq!(err, AnalysisError::UnknownPass("s1".to_string()));
        assert_eq!(err.to_string(), "unknown validation pass 's1'");
    }

    #[test]
    fn test_rejected_document_becomes_load_error() {
        let mut package = make_test_package();
        package["documents"]
            .as_array_mut()
            .unwrap()
            .push(json!({"kind": "AssessmentItem", "identifier": "bad",
                         "responseProcessing": [{"rule": "setFooValue"}]}));
        let result = validate(&package).unwrap();
        let errors: Vec<&ValidationItem> = result.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].pass, LOAD_PASS);
        assert_eq!(errors[0].path, "bad");
    }
}
