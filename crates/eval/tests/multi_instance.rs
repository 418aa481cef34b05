//! Multi-instance item ref integration tests.
//!
//! A section that selects one item ref several times with replacement
//! puts several instances of the same item in the plan. Covers:
//!
//! 1. Instance numbering in plan order, one item session per instance
//! 2. `ref.N.VAR` references reading a single instance
//! 3. `ref.VAR` falling back to the first instance with a warning
//! 4. A reference to an instance that was never selected reading NULL
//! 5. One item result per instance in the assessment result

use std::collections::BTreeMap;

use qti_eval::{AssessmentPackage, EngineSettings, NotificationLevel, TestSessionController, Value};
use serde_json::json;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

const T0: OffsetDateTime = datetime!(2024-09-02 08:30:00 UTC);

// ──────────────────────────────────────────────
// Test fixtures
// ──────────────────────────────────────────────

fn package() -> AssessmentPackage {
    let package = json!({
        "id": "repeat",
        "documents": [
            {
                "kind": "AssessmentTest",
                "identifier": "drill",
                "outcomeDeclarations": [
                    {"identifier": "TOTAL", "cardinality": "single", "baseType": "float"},
                    {"identifier": "FIRST", "cardinality": "single", "baseType": "float"},
                    {"identifier": "SECOND", "cardinality": "single", "baseType": "float"},
                    {"identifier": "MISSING", "cardinality": "single", "baseType": "boolean"}
                ],
                "testParts": [{
                    "identifier": "P1",
                    "navigationMode": "linear",
                    "submissionMode": "individual",
                    "assessmentSections": [{
                        "identifier": "S1",
                        "selection": {"select": 3, "withReplacement": true},
                        "sectionParts": [
                            {"kind": "assessmentItemRef", "identifier": "r", "href": "q1"}
                        ]
                    }]
                }],
                "outcomeProcessing": [
                    {"rule": "setOutcomeValue", "identifier": "TOTAL", "expression": {"expr": "sum", "args": [
                        {"expr": "variable", "identifier": "r.1.SCORE"},
                        {"expr": "variable", "identifier": "r.2.SCORE"},
                        {"expr": "variable", "identifier": "r.3.SCORE"}
                    ]}},
                    {"rule": "setOutcomeValue", "identifier": "FIRST",
                     "expression": {"expr": "variable", "identifier": "r.SCORE"}},
                    {"rule": "setOutcomeValue", "identifier": "SECOND",
                     "expression": {"expr": "variable", "identifier": "r.2.SCORE"}},
                    {"rule": "setOutcomeValue", "identifier": "MISSING", "expression": {"expr": "isNull", "args": [
                        {"expr": "variable", "identifier": "r.4.SCORE"}
                    ]}}
                ]
            },
            {
                "kind": "AssessmentItem",
                "identifier": "q1",
                "responseDeclarations": [{
                    "identifier": "RESPONSE", "cardinality": "single", "baseType": "identifier",
                    "correctResponse": "A"
                }],
                "outcomeDeclarations": [{
                    "identifier": "SCORE", "cardinality": "single", "baseType": "float", "defaultValue": 0.0
                }],
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
    });
    AssessmentPackage::from_interchange(&package).unwrap()
}

fn settings() -> EngineSettings {
    EngineSettings {
        random_seed: Some(5),
        ..EngineSettings::default()
    }
}

fn answer(choice: &str) -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([("RESPONSE".to_string(), vec![choice.to_string()])])
}

/// Enter every instance in turn and answer it with the given choices.
fn run(choices: &[&str]) -> TestSessionController {
    let package = package();
    let mut session = package.test_session("drill", settings()).unwrap();
    let mut clock = T0;
    let mut tick = || {
        clock += Duration::seconds(10);
        clock
    };
    session.initialize().unwrap();
    session.enter_test(tick()).unwrap();
    session.enter_next_test_part(tick()).unwrap();
    for choice in choices {
        let entered = session.enter_next_item(tick()).unwrap().map(|e| e.instance);
        assert!(entered.is_some(), "ran out of instances");
        session.submit_item(&answer(choice), tick()).unwrap();
    }
    session
}

// ──────────────────────────────────────────────
// 1. Instance numbering
// ──────────────────────────────────────────────

#[test]
fn selection_with_replacement_creates_numbered_instances() {
    let package = package();
    let mut session = package.test_session("drill", settings()).unwrap();
    session.initialize().unwrap();
    session.enter_test(T0).unwrap();
    session.enter_next_test_part(T0).unwrap();

    let mut instances = Vec::new();
    while session.has_more_items().unwrap() {
        let Some(entry) = session.enter_next_item(T0).unwrap() else {
            break;
        };
        assert_eq!(entry.item_ref.identifier, "r");
        instances.push(entry.instance);
    }
    assert_eq!(instances, vec![1, 2, 3]);
    assert!(session.item_session("r", 3).is_some());
    assert!(session.item_session("r", 4).is_none());
}

// ──────────────────────────────────────────────
// 2-4. Dotted references
// ──────────────────────────────────────────────

#[test]
fn numbered_references_read_one_instance() {
    let session = run(&["A", "B", "A"]);
    assert_eq!(session.value("TOTAL"), Some(Value::float(2.0)));
    assert_eq!(session.value("SECOND"), Some(Value::float(0.0)));
    assert_eq!(
        session.item_session("r", 2).unwrap().value("SCORE"),
        Some(Value::float(0.0))
    );
    assert_eq!(
        session.item_session("r", 3).unwrap().value("SCORE"),
        Some(Value::float(1.0))
    );
}

#[test]
fn unnumbered_reference_uses_the_first_instance() {
    let session = run(&["B", "A", "A"]);
    assert_eq!(session.value("FIRST"), Some(Value::float(0.0)));
    let notifications = session.all_notifications();
    assert!(notifications.all().iter().any(|n| {
        n.level == NotificationLevel::Warning && n.message.contains("has 3 instances, using the first")
    }));
}

#[test]
fn unselected_instance_reads_null() {
    let session = run(&["A"]);
    assert_eq!(session.value("MISSING"), Some(Value::boolean(true)));
    let notifications = session.all_notifications();
    assert!(notifications
        .warnings()
        .any(|n| n.message.contains("no selected instance of item ref 'r'")));
}

// ──────────────────────────────────────────────
// 5. Results
// ──────────────────────────────────────────────

#[test]
fn assessment_result_has_one_entry_per_instance() {
    let mut session = run(&["A", "A", "B"]);
    session.end_test_part(T0 + Duration::minutes(5)).unwrap();
    assert!(session.state().finished);

    let result = session.compute_assessment_result(T0 + Duration::minutes(5));
    let indices: Vec<Option<usize>> = result.item_results.iter().map(|r| r.sequence_index).collect();
    assert_eq!(indices, vec![Some(1), Some(2), Some(3)]);
    assert!(result.item_results.iter().all(|r| r.identifier == "r"));

    let scores: Vec<serde_json::Value> = result
        .item_results
        .iter()
        .map(|r| r.variable("SCORE").unwrap().value.clone())
        .collect();
    assert_eq!(scores, vec![json!(1.0), json!(1.0), json!(0.0)]);
    assert_eq!(
        result.test_result.variable("TOTAL").unwrap().value,
        json!(2.0)
    );
}
