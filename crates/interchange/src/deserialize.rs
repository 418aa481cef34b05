//! Deserialization from package JSON into typed envelopes.
//!
//! The main entry point is [`from_interchange`], which takes a
//! `&serde_json::Value` and produces a [`QtiPackage`].

use crate::types::*;

/// Errors during package JSON deserialization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterchangeError {
    /// The package is missing a required top-level field.
    #[error("package missing required field: '{field}'")]
    MissingField { field: String },
    /// A document is missing a required field or has a malformed one.
    #[error("{kind} '{id}': {message}")]
    DocumentError {
        kind: String,
        id: String,
        message: String,
    },
    /// Two documents share an identifier.
    #[error("duplicate document identifier '{0}'")]
    DuplicateDocument(String),
    /// The package structure is invalid.
    #[error("invalid package: {0}")]
    InvalidPackage(String),
}

/// Deserialize a package JSON document into typed envelopes.
///
/// Walks the `documents` array and dispatches on the `kind` field.
/// Unknown document kinds are skipped so that packages may carry
/// resources this runtime does not interpret.
pub fn from_interchange(package: &serde_json::Value) -> Result<QtiPackage, InterchangeError> {
    let id = package
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| InterchangeError::MissingField {
            field: "id".to_string(),
        })?
        .to_string();

    let qti_version = package
        .get("qti_version")
        .and_then(|v| v.as_str())
        .unwrap_or("2.1")
        .to_string();

    let documents_arr = package
        .get("documents")
        .and_then(|d| d.as_array())
        .ok_or_else(|| InterchangeError::MissingField {
            field: "documents".to_string(),
        })?;

    let mut documents: Vec<QtiDocument> = Vec::with_capacity(documents_arr.len());

    for obj in documents_arr {
        if !obj.is_object() {
            return Err(InterchangeError::InvalidPackage(
                "document entries must be objects".to_string(),
            ));
        }
        let kind = obj.get("kind").and_then(|k| k.as_str()).unwrap_or("");

        let document = match kind {
            "AssessmentItem" => Some(QtiDocument::Item(parse_item(obj)?)),
            "AssessmentTest" => Some(QtiDocument::Test(parse_test(obj)?)),
            _ => None,
        };

        if let Some(d) = document {
            if documents.iter().any(|e| e.identifier() == d.identifier()) {
                return Err(InterchangeError::DuplicateDocument(
                    d.identifier().to_string(),
                ));
            }
            documents.push(d);
        }
    }

    Ok(QtiPackage {
        id,
        qti_version,
        documents,
    })
}

// ── Parsing helpers ─────────────────────────────────────────────────

fn required_identifier(obj: &serde_json::Value, kind: &str) -> Result<String, InterchangeError> {
    obj.get("identifier")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            InterchangeError::InvalidPackage(format!("{} missing 'identifier' field", kind))
        })
}

fn optional_str(obj: &serde_json::Value, field: &str) -> Option<String> {
    obj.get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn flag(obj: &serde_json::Value, field: &str) -> bool {
    obj.get(field).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// Read an optional array field. A present field that is not an array is an error.
fn array_field(
    obj: &serde_json::Value,
    field: &str,
    kind: &str,
    id: &str,
) -> Result<Vec<serde_json::Value>, InterchangeError> {
    match obj.get(field) {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Array(arr)) => Ok(arr.clone()),
        Some(_) => Err(InterchangeError::DocumentError {
            kind: kind.to_string(),
            id: id.to_string(),
            message: format!("'{}' must be an array", field),
        }),
    }
}

fn parse_provenance(obj: &serde_json::Value) -> Option<Provenance> {
    let prov = obj.get("provenance")?;
    let file = prov.get("file")?.as_str()?.to_string();
    let line = prov.get("line")?.as_u64()?;
    Some(Provenance { file, line })
}

fn parse_item(obj: &serde_json::Value) -> Result<ItemDocument, InterchangeError> {
    let identifier = required_identifier(obj, "AssessmentItem")?;
    let kind = "AssessmentItem";

    let end_attempts = array_field(obj, "endAttempts", kind, &identifier)?
        .into_iter()
        .map(|v| {
            serde_json::from_value::<EndAttemptControl>(v).map_err(|e| {
                InterchangeError::DocumentError {
                    kind: kind.to_string(),
                    id: identifier.clone(),
                    message: format!("invalid endAttempts entry: {}", e),
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ItemDocument {
        title: optional_str(obj, "title"),
        adaptive: flag(obj, "adaptive"),
        time_dependent: flag(obj, "timeDependent"),
        response_declarations: array_field(obj, "responseDeclarations", kind, &identifier)?,
        outcome_declarations: array_field(obj, "outcomeDeclarations", kind, &identifier)?,
        template_declarations: array_field(obj, "templateDeclarations", kind, &identifier)?,
        template_processing: array_field(obj, "templateProcessing", kind, &identifier)?,
        response_processing: array_field(obj, "responseProcessing", kind, &identifier)?,
        end_attempts,
        provenance: parse_provenance(obj),
        identifier,
    })
}

fn parse_test(obj: &serde_json::Value) -> Result<TestDocument, InterchangeError> {
    let identifier = required_identifier(obj, "AssessmentTest")?;
    let kind = "AssessmentTest";

    let test_parts = array_field(obj, "testParts", kind, &identifier)?;
    if test_parts.is_empty() {
        return Err(InterchangeError::DocumentError {
            kind: kind.to_string(),
            id: identifier,
            message: "a test needs at least one testPart".to_string(),
        });
    }

    let time_limits = obj
        .get("timeLimits")
        .and_then(|t| if t.is_null() { None } else { Some(t.clone()) });

    Ok(TestDocument {
        title: optional_str(obj, "title"),
        outcome_declarations: array_field(obj, "outcomeDeclarations", kind, &identifier)?,
        time_limits,
        test_parts,
        outcome_processing: array_field(obj, "outcomeProcessing", kind, &identifier)?,
        test_feedbacks: array_field(obj, "testFeedbacks", kind, &identifier)?,
        provenance: parse_provenance(obj),
        identifier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_package(documents: Vec<serde_json::Value>) -> serde_json::Value {
        json!({
            "id": "test-package",
            "qti_version": "2.1",
            "documents": documents
        })
    }

    #[test]
    fn test_empty_package() {
        let package = make_package(vec![]);
        let result = from_interchange(&package).unwrap();
        assert_eq!(result.id, "test-package");
        assert_eq!(result.qti_version, "2.1");
        assert!(result.documents.is_empty());
    }

    #[test]
    fn test_missing_documents_array() {
        let package = json!({"id": "test"});
        match from_interchange(&package).unwrap_err() {
            InterchangeError::MissingField { field } => assert_eq!(field, "documents"),
            other => panic!("expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_package_id() {
        let package = json!({"documents": []});
        match from_interchange(&package).unwrap_err() {
            InterchangeError::MissingField { field } => assert_eq!(field, "id"),
            other => panic!("expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_item() {
        let package = make_package(vec![json!({
            "kind": "AssessmentItem",
            "identifier": "choice",
            "title": "Unattended Luggage",
            "adaptive": false,
            "responseDeclarations": [
                {"identifier": "RESPONSE", "cardinality": "single", "baseType": "identifier"}
            ],
            "outcomeDeclarations": [
                {"identifier": "SCORE", "cardinality": "single", "baseType": "float"}
            ],
            "responseProcessing": [{"rule": "exitResponse"}],
            "endAttempts": [{"responseIdentifier": "HINT", "countAttempt": false}],
            "provenance": {"file": "choice.xml", "line": 3}
        })]);
        let result = from_interchange(&package).unwrap();
        let item = result.item("choice").expect("item present");
        assert_eq!(item.title.as_deref(), Some("Unattended Luggage"));
        assert!(!item.adaptive);
        assert_eq!(item.response_declarations.len(), 1);
        assert_eq!(item.outcome_declarations.len(), 1);
        assert!(item.template_declarations.is_empty());
        assert_eq!(item.response_processing.len(), 1);
        assert_eq!(
            item.end_attempts,
            vec![EndAttemptControl {
                response_identifier: "HINT".to_string(),
                count_attempt: false,
            }]
        );
        assert_eq!(item.provenance.as_ref().map(|p| p.line), Some(3));
    }

    #[test]
    fn test_parse_test_requires_parts() {
        let package = make_package(vec![json!({
            "kind": "AssessmentTest",
            "identifier": "t1",
            "testParts": []
        })]);
        match from_interchange(&package).unwrap_err() {
            InterchangeError::DocumentError { kind, id, .. } => {
                assert_eq!(kind, "AssessmentTest");
                assert_eq!(id, "t1");
            }
            other => panic!("expected DocumentError, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_test() {
        let package = make_package(vec![json!({
            "kind": "AssessmentTest",
            "identifier": "t1",
            "timeLimits": {"maxTime": 600.0},
            "testParts": [{"identifier": "P1", "assessmentSections": []}],
            "outcomeProcessing": [],
            "testFeedbacks": [{"identifier": "FB", "outcomeIdentifier": "GRADE"}]
        })]);
        let result = from_interchange(&package).unwrap();
        let test = result.test("t1").expect("test present");
        assert_eq!(test.test_parts.len(), 1);
        assert_eq!(test.test_feedbacks.len(), 1);
        assert!(test.time_limits.is_some());
    }

    #[test]
    fn test_non_array_field_rejected() {
        let package = make_package(vec![json!({
            "kind": "AssessmentItem",
            "identifier": "bad",
            "responseProcessing": {"rule": "exitResponse"}
        })]);
        let err = from_interchange(&package).unwrap_err();
        assert!(err.to_string().contains("'responseProcessing' must be an array"));
    }

    #[test]
    fn test_unknown_kind_skipped() {
        let package = make_package(vec![
            json!({"kind": "Stylesheet", "identifier": "css"}),
            json!({"kind": "AssessmentItem", "identifier": "q1"}),
        ]);
        let result = from_interchange(&package).unwrap();
        assert_eq!(result.documents.len(), 1);
        assert_eq!(result.items().count(), 1);
        assert_eq!(result.tests().count(), 0);
    }

    #[test]
    fn test_duplicate_document_identifier() {
        let package = make_package(vec![
            json!({"kind": "AssessmentItem", "identifier": "q1"}),
            json!({"kind": "AssessmentItem", "identifier": "q1"}),
        ]);
        assert_eq!(
            from_interchange(&package).unwrap_err(),
            InterchangeError::DuplicateDocument("q1".to_string())
        );
    }
}
