//! Numeric regression suite.
//!
//! Each case runs one expression through response processing of a
//! throwaway item and checks the value written to its OUT outcome.
//! Organized by category:
//!   A. Integer and float arithmetic
//!   B. Integer division and rounding
//!   C. roundTo / equalRounded
//!   D. Tolerance comparison
//!   E. Math and statistics operators
//!   F. NULL propagation

use qti_eval::types::SingleValue;
use qti_eval::{AssessmentPackage, EngineSettings, Value};
use serde_json::json;
use std::collections::BTreeMap;

// ──────────────────────────────────────────────
// Test helpers
// ──────────────────────────────────────────────

/// Evaluate `expr` into an outcome of the given base type.
fn eval_as(base_type: &str, expr: serde_json::Value) -> Value {
    let package = json!({
        "id": "numeric",
        "documents": [{
            "kind": "AssessmentItem",
            "identifier": "n",
            "outcomeDeclarations": [
                {"identifier": "OUT", "cardinality": "single", "baseType": base_type}
            ],
            "responseProcessing": [
                {"rule": "setOutcomeValue", "identifier": "OUT", "expression": expr}
            ]
        }]
    });
    let pkg = AssessmentPackage::from_interchange(&package).unwrap();
    let mut session = pkg.item_session("n", EngineSettings::default()).unwrap();
    session.initialize(&[]).unwrap();
    let now = time::OffsetDateTime::now_utc();
    session.enter(now).unwrap();
    let submitted = session.submit(&BTreeMap::new(), now).unwrap();
    assert!(submitted.processed);
    session.value("OUT").unwrap()
}

fn int(i: i64) -> serde_json::Value {
    json!({"expr": "baseValue", "baseType": "integer", "value": i})
}

fn float(x: f64) -> serde_json::Value {
    json!({"expr": "baseValue", "baseType": "float", "value": x})
}

fn op(name: &str, args: Vec<serde_json::Value>) -> serde_json::Value {
    json!({"expr": name, "args": args})
}

fn boolean(b: bool) -> Value {
    Value::Single(SingleValue::Boolean(b))
}

// ──────────────────────────────────────────────
// A. Integer and float arithmetic
// ──────────────────────────────────────────────

#[test]
fn a1_integer_sum_stays_integer() {
    assert_eq!(eval_as("integer", op("sum", vec![int(1), int(2), int(3)])), Value::integer(6));
}

#[test]
fn a2_mixed_sum_is_float() {
    assert_eq!(eval_as("float", op("sum", vec![int(1), float(2.5)])), Value::float(3.5));
}

#[test]
fn a3_integer_overflow_is_null() {
    assert_eq!(
        eval_as("integer", op("sum", vec![int(i64::MAX), int(1)])),
        Value::Null
    );
    assert_eq!(
        eval_as("integer", op("product", vec![int(i64::MAX), int(2)])),
        Value::Null
    );
}

#[test]
fn a4_subtract_and_product() {
    assert_eq!(eval_as("integer", op("subtract", vec![int(3), int(10)])), Value::integer(-7));
    assert_eq!(
        eval_as("float", op("product", vec![float(1.5), int(4)])),
        Value::float(6.0)
    );
}

#[test]
fn a5_divide_is_always_float() {
    assert_eq!(eval_as("float", op("divide", vec![int(7), int(2)])), Value::float(3.5));
    assert_eq!(eval_as("float", op("divide", vec![int(6), int(3)])), Value::float(2.0));
}

#[test]
fn a6_power() {
    assert_eq!(eval_as("float", op("power", vec![int(2), int(10)])), Value::float(1024.0));
    assert_eq!(eval_as("float", op("power", vec![float(4.0), float(0.5)])), Value::float(2.0));
}

#[test]
fn a7_integer_to_float() {
    assert_eq!(eval_as("float", op("integerToFloat", vec![int(5)])), Value::float(5.0));
}

// ──────────────────────────────────────────────
// B. Integer division and rounding
// ──────────────────────────────────────────────

#[test]
fn b1_integer_divide_floors() {
    assert_eq!(eval_as("integer", op("integerDivide", vec![int(7), int(2)])), Value::integer(3));
    assert_eq!(eval_as("integer", op("integerDivide", vec![int(-7), int(2)])), Value::integer(-4));
}

#[test]
fn b2_integer_modulus_follows_floor_division() {
    assert_eq!(eval_as("integer", op("integerModulus", vec![int(7), int(3)])), Value::integer(1));
    assert_eq!(eval_as("integer", op("integerModulus", vec![int(-7), int(2)])), Value::integer(1));
}

#[test]
fn b3_division_by_zero_is_null() {
    assert_eq!(eval_as("integer", op("integerDivide", vec![int(1), int(0)])), Value::Null);
    assert_eq!(eval_as("integer", op("integerModulus", vec![int(1), int(0)])), Value::Null);
    assert_eq!(eval_as("float", op("divide", vec![float(1.0), int(0)])), Value::Null);
}

#[test]
fn b4_truncate_towards_zero() {
    assert_eq!(eval_as("integer", op("truncate", vec![float(2.7)])), Value::integer(2));
    assert_eq!(eval_as("integer", op("truncate", vec![float(-2.7)])), Value::integer(-2));
}

#[test]
fn b5_round_half_up() {
    assert_eq!(eval_as("integer", op("round", vec![float(2.5)])), Value::integer(3));
    assert_eq!(eval_as("integer", op("round", vec![float(-2.5)])), Value::integer(-2));
    assert_eq!(eval_as("integer", op("round", vec![float(-2.6)])), Value::integer(-3));
}

// ──────────────────────────────────────────────
// C. roundTo / equalRounded
// ──────────────────────────────────────────────

fn round_to(mode: &str, figures: i64, x: f64) -> serde_json::Value {
    json!({"expr": "roundTo", "roundingMode": mode, "figures": figures, "args": [float(x)]})
}

#[test]
fn c1_significant_figures() {
    assert_eq!(eval_as("float", round_to("significantFigures", 3, 1.2345)), Value::float(1.23));
    assert_eq!(eval_as("float", round_to("significantFigures", 2, 1234.0)), Value::float(1200.0));
    assert_eq!(eval_as("float", round_to("significantFigures", 2, 0.012345)), Value::float(0.012));
}

#[test]
fn c2_decimal_places_round_the_decimal_form() {
    assert_eq!(eval_as("float", round_to("decimalPlaces", 2, 2.675)), Value::float(2.68));
    assert_eq!(eval_as("float", round_to("decimalPlaces", 0, 2.5)), Value::float(3.0));
}

#[test]
fn c3_illegal_figures_are_null() {
    assert_eq!(eval_as("float", round_to("significantFigures", 0, 1.5)), Value::Null);
}

#[test]
fn c4_equal_rounded() {
    let expr = json!({
        "expr": "equalRounded", "roundingMode": "decimalPlaces", "figures": 1,
        "args": [float(3.14), float(3.149)]
    });
    assert_eq!(eval_as("boolean", expr), boolean(true));
    let expr = json!({
        "expr": "equalRounded", "roundingMode": "significantFigures", "figures": 3,
        "args": [float(3.14), float(3.149)]
    });
    assert_eq!(eval_as("boolean", expr), boolean(false));
}

// ──────────────────────────────────────────────
// D. Tolerance comparison
// ──────────────────────────────────────────────

fn equal(mode: &str, tolerance: serde_json::Value, x: f64, y: f64) -> serde_json::Value {
    json!({"expr": "equal", "toleranceMode": mode, "tolerance": tolerance, "args": [float(x), float(y)]})
}

#[test]
fn d1_exact() {
    assert_eq!(eval_as("boolean", equal("exact", json!(null), 1.0, 1.0)), boolean(true));
    assert_eq!(eval_as("boolean", equal("exact", json!(null), 1.0, 1.5)), boolean(false));
}

#[test]
fn d2_absolute_bounds_are_inclusive() {
    assert_eq!(eval_as("boolean", equal("absolute", json!([0.5]), 10.0, 10.5)), boolean(true));
    assert_eq!(eval_as("boolean", equal("absolute", json!([0.5]), 10.0, 10.6)), boolean(false));
    assert_eq!(eval_as("boolean", equal("absolute", json!([1, 0]), 10.0, 9.0)), boolean(true));
}

#[test]
fn d3_relative_is_a_percentage() {
    assert_eq!(eval_as("boolean", equal("relative", json!([10]), 100.0, 109.0)), boolean(true));
    assert_eq!(eval_as("boolean", equal("relative", json!([10]), 100.0, 111.0)), boolean(false));
}

#[test]
fn d4_excluded_bound() {
    let expr = json!({
        "expr": "equal", "toleranceMode": "absolute", "tolerance": [1],
        "includeUpperBound": false, "args": [float(5.0), float(6.0)]
    });
    assert_eq!(eval_as("boolean", expr), boolean(false));
}

// ──────────────────────────────────────────────
// E. Math and statistics operators
// ──────────────────────────────────────────────

fn math(name: &str, args: Vec<serde_json::Value>) -> serde_json::Value {
    json!({"expr": "mathOperator", "name": name, "args": args})
}

fn stats(name: &str, values: &[i64]) -> serde_json::Value {
    json!({"expr": "statsOperator", "name": name, "args": [
        op("multiple", values.iter().map(|v| int(*v)).collect())
    ]})
}

#[test]
fn e1_floor_and_ceil_are_integers() {
    assert_eq!(eval_as("integer", math("floor", vec![float(-1.5)])), Value::integer(-2));
    assert_eq!(eval_as("integer", math("ceil", vec![float(1.1)])), Value::integer(2));
}

#[test]
fn e2_out_of_domain_is_null() {
    assert_eq!(eval_as("float", math("ln", vec![float(-1.0)])), Value::Null);
    assert_eq!(eval_as("float", math("asin", vec![float(2.0)])), Value::Null);
}

#[test]
fn e3_constants() {
    let pi = json!({"expr": "mathConstant", "name": "pi"});
    assert_eq!(eval_as("float", pi), Value::float(std::f64::consts::PI));
}

#[test]
fn e4_statistics() {
    assert_eq!(eval_as("float", stats("mean", &[1, 2, 3, 4])), Value::float(2.5));
    assert_eq!(eval_as("float", stats("popVariance", &[1, 3])), Value::float(1.0));
    assert_eq!(eval_as("float", stats("sampleVariance", &[1, 3])), Value::float(2.0));
    assert_eq!(eval_as("float", stats("sampleVariance", &[1])), Value::Null);
}

#[test]
fn e5_max_min_keep_integers() {
    assert_eq!(eval_as("integer", op("max", vec![int(3), int(9), int(-1)])), Value::integer(9));
    assert_eq!(eval_as("float", op("min", vec![int(3), float(0.5)])), Value::float(0.5));
}

// ──────────────────────────────────────────────
// F. NULL propagation
// ──────────────────────────────────────────────

#[test]
fn f1_null_operands() {
    let null = json!({"expr": "null"});
    assert_eq!(eval_as("integer", op("sum", vec![int(1), null.clone()])), Value::Null);
    assert_eq!(eval_as("integer", op("round", vec![null.clone()])), Value::Null);
    assert_eq!(eval_as("boolean", op("isNull", vec![null])), boolean(true));
}

#[test]
fn f2_container_size_of_null_is_zero() {
    assert_eq!(
        eval_as("integer", op("containerSize", vec![json!({"expr": "null"})])),
        Value::integer(0)
    );
}
