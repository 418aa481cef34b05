//! Traversal shared by the passes: diagnostic paths, rule and expression
//! walks, test structure walks and static result types.

use qti_eval::types::{
    AssessmentItemRef, AssessmentSection, AssessmentTest, BaseType, Cardinality, Expression,
    Operator, ProcessingRule, RuleScope, SectionPart, TestPart,
};

use crate::package::{Document, Lookup, ValidationPackage};

// ──────────────────────────────────────────────
// Paths
// ──────────────────────────────────────────────

pub(crate) fn child(parent: &str, segment: &str) -> String {
    format!("{}/{}", parent, segment)
}

pub(crate) fn indexed(parent: &str, field: &str, index: usize) -> String {
    format!("{}/{}[{}]", parent, field, index)
}

// ──────────────────────────────────────────────
// Rules
// ──────────────────────────────────────────────

/// A top-level processing rule list of a document.
pub(crate) struct RuleList<'a> {
    pub field: &'static str,
    pub scope: RuleScope,
    pub rules: &'a [ProcessingRule],
}

pub(crate) fn rule_lists(doc: Document<'_>) -> Vec<RuleList<'_>> {
    match doc {
        Document::Item(item) => vec![
            RuleList {
                field: "templateProcessing",
                scope: RuleScope::Template,
                rules: &item.template_processing,
            },
            RuleList {
                field: "responseProcessing",
                scope: RuleScope::Response,
                rules: &item.response_processing,
            },
        ],
        Document::Test(test) => vec![RuleList {
            field: "outcomeProcessing",
            scope: RuleScope::Outcome,
            rules: &test.outcome_processing,
        }],
    }
}

/// Call `f` on every rule of a list, parents before their children.
pub(crate) fn visit_rules<'a>(
    parent: &str,
    field: &str,
    rules: &'a [ProcessingRule],
    f: &mut dyn FnMut(&str, &'a ProcessingRule),
) {
    for (i, rule) in rules.iter().enumerate() {
        let path = indexed(parent, field, i);
        f(&path, rule);
        match rule {
            ProcessingRule::Condition {
                scope,
                if_branch,
                else_ifs,
                else_rules,
            } => {
                let if_path = child(&path, ProcessingRule::if_name(*scope));
                visit_rules(&if_path, "rules", &if_branch.rules, f);
                for (k, branch) in else_ifs.iter().enumerate() {
                    let branch_path = indexed(&path, ProcessingRule::else_if_name(*scope), k);
                    visit_rules(&branch_path, "rules", &branch.rules, f);
                }
                if let Some(rules) = else_rules {
                    let else_path = child(&path, ProcessingRule::else_name(*scope));
                    visit_rules(&else_path, "rules", rules, f);
                }
            }
            ProcessingRule::Fragment { rules, .. } => visit_rules(&path, "rules", rules, f),
            _ => {}
        }
    }
}

/// Expressions held directly by a rule, each with the path of its field.
pub(crate) fn rule_expressions<'a>(
    path: &str,
    rule: &'a ProcessingRule,
) -> Vec<(String, &'a Expression)> {
    match rule {
        ProcessingRule::Condition {
            scope,
            if_branch,
            else_ifs,
            ..
        } => {
            let if_path = child(path, ProcessingRule::if_name(*scope));
            let mut out = vec![(child(&if_path, "condition"), &if_branch.condition)];
            for (k, branch) in else_ifs.iter().enumerate() {
                let branch_path = indexed(path, ProcessingRule::else_if_name(*scope), k);
                out.push((child(&branch_path, "condition"), &branch.condition));
            }
            out
        }
        ProcessingRule::SetValue { expression, .. }
        | ProcessingRule::LookupOutcomeValue { expression, .. }
        | ProcessingRule::TemplateConstraint(expression) => {
            vec![(child(path, "expression"), expression)]
        }
        ProcessingRule::Exit(_) | ProcessingRule::Fragment { .. } => Vec::new(),
    }
}

// ──────────────────────────────────────────────
// Expressions
// ──────────────────────────────────────────────

/// Call `f` on `expr` and every descendant. The root's path is
/// `field_path/<class>`; argument `i` of a node is `<node>/<class>[i]`.
pub(crate) fn visit_expression<'a>(
    field_path: &str,
    expr: &'a Expression,
    f: &mut dyn FnMut(&str, &'a Expression),
) {
    visit_node(&child(field_path, expr.class_name()), expr, f);
}

fn visit_node<'a>(path: &str, expr: &'a Expression, f: &mut dyn FnMut(&str, &'a Expression)) {
    f(path, expr);
    for (i, arg) in expr.args().iter().enumerate() {
        visit_node(&indexed(path, arg.class_name(), i), arg, f);
    }
}

/// Statically known (cardinality, base type) of an expression's result.
/// Variable references resolve through the package; `None` means the
/// type depends on runtime values.
pub(crate) fn produced(
    pkg: &ValidationPackage,
    doc: Document<'_>,
    expr: &Expression,
) -> (Option<Cardinality>, Option<BaseType>) {
    match expr {
        Expression::Variable {
            identifier,
            weight_identifier,
        } => match pkg.lookup(doc, identifier) {
            Lookup::Declared(d) => {
                let base_type = match (d.base_type, weight_identifier) {
                    (Some(BaseType::Integer), Some(_)) => Some(BaseType::Float),
                    (bt, _) => bt,
                };
                (Some(d.cardinality), base_type)
            }
            _ => (None, None),
        },
        Expression::Default(identifier) | Expression::Correct(identifier) => {
            match pkg.lookup(doc, identifier) {
                Lookup::Declared(d) => (Some(d.cardinality), d.base_type),
                _ => (None, None),
            }
        }
        Expression::Operator {
            operator:
                Operator::Sum | Operator::Product | Operator::Subtract | Operator::Max | Operator::Min,
            args,
        } => {
            let mut base_type = Some(BaseType::Integer);
            for arg in args {
                base_type = match (base_type, produced(pkg, doc, arg).1) {
                    (Some(BaseType::Integer), Some(BaseType::Integer)) => Some(BaseType::Integer),
                    (Some(acc), Some(bt)) if acc.is_numeric() && bt.is_numeric() => {
                        Some(BaseType::Float)
                    }
                    _ => None,
                };
            }
            (expr.static_cardinality(), base_type)
        }
        _ => (expr.static_cardinality(), expr.static_base_type()),
    }
}

// ──────────────────────────────────────────────
// Test structure
// ──────────────────────────────────────────────

/// A node of a test's part/section tree.
#[derive(Clone, Copy)]
pub(crate) enum StructureNode<'a> {
    Part(&'a TestPart),
    Section(&'a AssessmentSection),
    ItemRef(&'a AssessmentItemRef),
}

/// Call `f(path, part, node)` on every part, section and item ref of a
/// test in document order, parents first.
pub(crate) fn visit_structure<'a>(
    test: &'a AssessmentTest,
    f: &mut dyn FnMut(&str, &'a TestPart, StructureNode<'a>),
) {
    fn section<'a>(
        path: &str,
        part: &'a TestPart,
        s: &'a AssessmentSection,
        f: &mut dyn FnMut(&str, &'a TestPart, StructureNode<'a>),
    ) {
        f(path, part, StructureNode::Section(s));
        for (k, sp) in s.parts.iter().enumerate() {
            let sp_path = indexed(path, "sectionParts", k);
            match sp {
                SectionPart::Section(inner) => section(&sp_path, part, inner, f),
                SectionPart::ItemRef(r) => f(&sp_path, part, StructureNode::ItemRef(r)),
            }
        }
    }

    for (p, part) in test.test_parts.iter().enumerate() {
        let part_path = indexed(&test.identifier, "testParts", p);
        f(&part_path, part, StructureNode::Part(part));
        for (s, sec) in part.sections.iter().enumerate() {
            section(&indexed(&part_path, "assessmentSections", s), part, sec, f);
        }
    }
}

/// Every item ref of a test with its path and enclosing part.
pub(crate) fn item_refs(test: &AssessmentTest) -> Vec<(String, &TestPart, &AssessmentItemRef)> {
    let mut out = Vec::new();
    visit_structure(test, &mut |path, part, node| {
        if let StructureNode::ItemRef(r) = node {
            out.push((path.to_string(), part, r));
        }
    });
    out
}
