//! V2 -- Expressions.
//!
//! Walks every expression held by a processing rule, and the
//! templateDefault expressions of item refs, checking each node on its
//! own: argument counts, variable references, weights, argument types
//! known before evaluation, and operator attributes (tolerances,
//! rounding figures, anyN bounds, random ranges, shapes). Item-subset
//! expressions are only meaningful inside tests.

use qti_eval::types::{
    BaseType, Cardinality, Expression, Operator, RoundingMode, SubsetKind, ToleranceMode,
    VariableKind,
};

use crate::package::{Document, Lookup, ValidationPackage};
use crate::report::ValidationItem;
use crate::v1_declarations::coords_problem;
use crate::walk::{
    child, indexed, item_refs, produced, rule_expressions, rule_lists, visit_expression,
    visit_rules,
};

const PASS: &str = "v2";

/// V2 -- check every expression node of every built document.
pub fn check_expressions(package: &ValidationPackage) -> Vec<ValidationItem> {
    let mut items = Vec::new();
    for doc in package.documents() {
        for list in rule_lists(doc) {
            visit_rules(doc.identifier(), list.field, list.rules, &mut |path, rule| {
                for (field, expr) in rule_expressions(path, rule) {
                    visit_expression(&field, expr, &mut |p, e| {
                        check_node(package, doc, p, e, &mut items)
                    });
                }
            });
        }

        // templateDefault expressions run against the referenced item.
        if let Document::Test(test) = doc {
            for (ref_path, _, item_ref) in item_refs(test) {
                let Some(item) = package.item(&item_ref.href) else {
                    continue;
                };
                for (i, td) in item_ref.template_defaults.iter().enumerate() {
                    let field = child(&indexed(&ref_path, "templateDefaults", i), "expression");
                    visit_expression(&field, &td.expression, &mut |p, e| {
                        check_node(package, Document::Item(item), p, e, &mut items)
                    });
                }
            }
        }
    }
    items
}

fn check_node(
    pkg: &ValidationPackage,
    doc: Document<'_>,
    path: &str,
    expr: &Expression,
    items: &mut Vec<ValidationItem>,
) {
    check_arity(path, expr, items);
    check_reference(pkg, doc, path, expr, items);
    check_argument_types(pkg, doc, path, expr, items);
    check_attributes(path, expr, items);
    if let Expression::ItemSubset(subset) = expr {
        match doc {
            Document::Item(_) => items.push(ValidationItem::error(
                PASS,
                path,
                format!("{} may only be used in tests", expr.class_name()),
            )),
            Document::Test(test) => {
                if let Some(section) = &subset.section_identifier {
                    if !test.sections().iter().any(|s| &s.identifier == section) {
                        items.push(ValidationItem::error(
                            PASS,
                            path,
                            format!("sectionIdentifier '{}' is not a section of this test", section),
                        ));
                    }
                }
                let weight = match &subset.kind {
                    SubsetKind::OutcomeMinimum {
                        weight_identifier, ..
                    }
                    | SubsetKind::OutcomeMaximum {
                        weight_identifier, ..
                    }
                    | SubsetKind::TestVariables {
                        weight_identifier, ..
                    } => weight_identifier.as_deref(),
                    _ => None,
                };
                if let Some(weight) = weight {
                    let defined = test
                        .item_refs()
                        .iter()
                        .any(|(r, _)| r.weights.contains_key(weight));
                    if !defined {
                        items.push(ValidationItem::warning(
                            PASS,
                            path,
                            format!("weight '{}' is not defined on any item ref", weight),
                        ));
                    }
                }
            }
        }
    }
}

fn check_arity(path: &str, expr: &Expression, items: &mut Vec<ValidationItem>) {
    let n = expr.args().len();
    let (min, max) = expr.arity();
    if n >= min && max.map_or(true, |max| n <= max) {
        return;
    }
    let expected = match max {
        Some(max) if max == min => format!("{}", min),
        Some(max) => format!("{} to {}", min, max),
        None => format!("at least {}", min),
    };
    let name = match expr {
        Expression::MathOperator { operator, .. } => {
            format!("mathOperator '{}'", operator.name())
        }
        other => other.class_name().to_string(),
    };
    items.push(ValidationItem::error(
        PASS,
        path,
        format!("{} expects {} argument(s), got {}", name, expected, n),
    ));
}

fn check_reference(
    pkg: &ValidationPackage,
    doc: Document<'_>,
    path: &str,
    expr: &Expression,
    items: &mut Vec<ValidationItem>,
) {
    let Some(identifier) = expr.referenced_identifier() else {
        return;
    };
    let declaration = match pkg.lookup(doc, identifier) {
        Lookup::Declared(d) => d,
        Lookup::Unresolved => return,
        Lookup::Undeclared => {
            items.push(ValidationItem::error(
                PASS,
                path,
                format!("variable '{}' is not declared", identifier),
            ));
            return;
        }
    };

    let requirement = match expr {
        Expression::Correct(_) if declaration.kind() != VariableKind::Response => {
            Some("a response variable")
        }
        Expression::MapResponse(_) if declaration.mapping().is_none() => {
            Some("a response variable with a mapping")
        }
        Expression::MapResponsePoint(_) if declaration.area_mapping().is_none() => {
            Some("a response variable with an areaMapping")
        }
        _ => None,
    };
    if let Some(requirement) = requirement {
        items.push(ValidationItem::error(
            PASS,
            path,
            format!(
                "{} requires {}, '{}' is not",
                expr.class_name(),
                requirement,
                identifier
            ),
        ));
    }

    if let Expression::Variable {
        identifier,
        weight_identifier: Some(weight),
    } = expr
    {
        match doc {
            Document::Item(_) => items.push(ValidationItem::error(
                PASS,
                path,
                "weightIdentifier may only be used in tests",
            )),
            Document::Test(test) => {
                let Some((ref_identifier, _)) = identifier.split_once('.') else {
                    items.push(ValidationItem::warning(
                        PASS,
                        path,
                        "weightIdentifier has no effect on a test-level variable",
                    ));
                    return;
                };
                let defined = test
                    .item_ref(ref_identifier)
                    .is_some_and(|r| r.weights.contains_key(weight));
                if !defined {
                    items.push(ValidationItem::warning(
                        PASS,
                        path,
                        format!(
                            "weight '{}' is not defined on item ref '{}'",
                            weight, ref_identifier
                        ),
                    ));
                }
            }
        }
    }
}

/// What each operator needs from its arguments.
#[derive(Clone, Copy, PartialEq)]
enum Needs {
    Numeric,
    Integer,
    Boolean,
}

fn check_argument_types(
    pkg: &ValidationPackage,
    doc: Document<'_>,
    path: &str,
    expr: &Expression,
    items: &mut Vec<ValidationItem>,
) {
    use Operator::*;

    // (required element type, whether containers are accepted)
    let (needs, containers) = match expr {
        Expression::MathOperator { .. }
        | Expression::RoundTo { .. }
        | Expression::EqualRounded { .. }
        | Expression::Equal { .. } => (Needs::Numeric, false),
        Expression::StatsOperator { .. } => (Needs::Numeric, true),
        Expression::AnyN { .. } => (Needs::Boolean, false),
        Expression::Operator { operator, .. } => match operator {
            Sum | Product | Subtract | Divide | Power | Truncate | Round | Lt | Lte | Gt
            | Gte => (Needs::Numeric, false),
            Max | Min => (Needs::Numeric, true),
            IntegerDivide | IntegerModulus | IntegerToFloat => (Needs::Integer, false),
            And | Or | Not => (Needs::Boolean, false),
            Match => {
                check_match(pkg, doc, path, expr, items);
                return;
            }
            _ => return,
        },
        _ => return,
    };

    for (i, arg) in expr.args().iter().enumerate() {
        let (cardinality, base_type) = produced(pkg, doc, arg);
        let arg_path = indexed(path, arg.class_name(), i);
        if let Some(bt) = base_type {
            let fits = match needs {
                Needs::Numeric => bt.is_numeric(),
                Needs::Integer => bt == BaseType::Integer,
                Needs::Boolean => bt == BaseType::Boolean,
            };
            if !fits {
                let wanted = match needs {
                    Needs::Numeric => "numeric",
                    Needs::Integer => "integer",
                    Needs::Boolean => "boolean",
                };
                items.push(ValidationItem::error(
                    PASS,
                    &arg_path,
                    format!(
                        "{} requires {} arguments, got {}",
                        expr.class_name(),
                        wanted,
                        bt.name()
                    ),
                ));
            }
        }
        match (cardinality, expr) {
            (Some(Cardinality::Single), Expression::StatsOperator { .. }) => {
                items.push(ValidationItem::error(
                    PASS,
                    &arg_path,
                    "statsOperator requires a multiple or ordered container",
                ));
            }
            (Some(Cardinality::Record), _) => {
                items.push(ValidationItem::error(
                    PASS,
                    &arg_path,
                    format!("{} cannot take a record argument", expr.class_name()),
                ));
            }
            (Some(Cardinality::Multiple | Cardinality::Ordered), _) if !containers => {
                items.push(ValidationItem::error(
                    PASS,
                    &arg_path,
                    format!("{} requires single cardinality arguments", expr.class_name()),
                ));
            }
            _ => {}
        }
    }
}

fn check_match(
    pkg: &ValidationPackage,
    doc: Document<'_>,
    path: &str,
    expr: &Expression,
    items: &mut Vec<ValidationItem>,
) {
    let [left, right] = expr.args() else {
        return;
    };
    let (lc, lb) = produced(pkg, doc, left);
    let (rc, rb) = produced(pkg, doc, right);
    if let (Some(lb), Some(rb)) = (lb, rb) {
        if lb != rb {
            items.push(ValidationItem::error(
                PASS,
                path,
                format!("match compares {} with {}", lb.name(), rb.name()),
            ));
        }
    }
    if let (Some(lc), Some(rc)) = (lc, rc) {
        if lc != rc {
            items.push(ValidationItem::error(
                PASS,
                path,
                format!("match compares {} with {} cardinality", lc, rc),
            ));
        }
    }
    if matches!(lb, Some(BaseType::Duration)) || matches!(rb, Some(BaseType::Duration)) {
        items.push(ValidationItem::warning(
            PASS,
            path,
            "match on durations is exact; durationLT/durationGTE are usually meant",
        ));
    }
}

fn check_attributes(path: &str, expr: &Expression, items: &mut Vec<ValidationItem>) {
    match expr {
        Expression::Equal {
            tolerance_mode,
            tolerances,
            ..
        } => {
            match (tolerance_mode, tolerances.len()) {
                (ToleranceMode::Exact, n) if n > 0 => items.push(ValidationItem::warning(
                    PASS,
                    path,
                    "tolerance is ignored when toleranceMode is exact",
                )),
                (ToleranceMode::Absolute | ToleranceMode::Relative, 0) => {
                    items.push(ValidationItem::error(
                        PASS,
                        path,
                        "tolerance is required when toleranceMode is absolute or relative",
                    ))
                }
                (_, n) if n > 2 => items.push(ValidationItem::error(
                    PASS,
                    path,
                    format!("tolerance takes one or two values, got {}", n),
                )),
                _ => {}
            }
            if tolerances.iter().any(|t| *t < 0.0) {
                items.push(ValidationItem::error(
                    PASS,
                    path,
                    "tolerance values must not be negative",
                ));
            }
        }
        Expression::RoundTo {
            rounding_mode,
            figures,
            ..
        }
        | Expression::EqualRounded {
            rounding_mode,
            figures,
            ..
        } => {
            let smallest = match rounding_mode {
                RoundingMode::SignificantFigures => 1,
                RoundingMode::DecimalPlaces => 0,
            };
            if *figures < smallest {
                items.push(ValidationItem::error(
                    PASS,
                    path,
                    format!(
                        "figures must be at least {} for this roundingMode, got {}",
                        smallest, figures
                    ),
                ));
            }
        }
        Expression::AnyN { min, max, args } => {
            if *min < 0 {
                items.push(ValidationItem::warning(PASS, path, "anyN min is negative"));
            }
            if min > max {
                items.push(ValidationItem::warning(
                    PASS,
                    path,
                    format!("anyN min {} is greater than max {}", min, max),
                ));
            }
            if *min > args.len() as i64 {
                items.push(ValidationItem::warning(
                    PASS,
                    path,
                    format!(
                        "anyN min {} exceeds its {} argument(s) and can never be met",
                        min,
                        args.len()
                    ),
                ));
            }
        }
        Expression::RandomInteger { min, max, step } => {
            if min > max {
                items.push(ValidationItem::error(
                    PASS,
                    path,
                    format!("randomInteger min {} is greater than max {}", min, max),
                ));
            }
            if *step < 1 {
                items.push(ValidationItem::error(
                    PASS,
                    path,
                    "randomInteger step must be at least 1",
                ));
            }
        }
        Expression::RandomFloat { min, max } => {
            if min > max {
                items.push(ValidationItem::error(
                    PASS,
                    path,
                    format!("randomFloat min {} is greater than max {}", min, max),
                ));
            }
        }
        Expression::Index { n, .. } if *n < 1 => {
            items.push(ValidationItem::warning(
                PASS,
                path,
                format!("index n is 1-based, {} always yields NULL", n),
            ));
        }
        Expression::Inside { shape, coords, .. } => {
            if let Some(problem) = coords_problem(*shape, coords) {
                items.push(ValidationItem::error(PASS, path, problem));
            }
        }
        _ => {}
    }
}
