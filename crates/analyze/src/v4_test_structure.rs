//! V4 -- Test structure.
//!
//! Identifier uniqueness across parts, sections and item refs, item refs
//! that resolve to item documents, selection sizes, time limits, item
//! session control and test feedback outcome identifiers.

use std::collections::BTreeSet;

use qti_eval::types::{
    AssessmentTest, ItemSessionControl, SubmissionMode, TestFeedback, TimeLimits, VariableKind,
};

use crate::package::{Document, Lookup, ValidationPackage};
use crate::report::ValidationItem;
use crate::walk::{child, indexed, visit_structure, StructureNode};

const PASS: &str = "v4";

/// V4 -- check the structure of every built test.
pub fn check_test_structure(package: &ValidationPackage) -> Vec<ValidationItem> {
    let mut items = Vec::new();
    for test in &package.tests {
        check_test(package, test, &mut items);
    }
    items
}

fn check_test(pkg: &ValidationPackage, test: &AssessmentTest, items: &mut Vec<ValidationItem>) {
    let root = test.identifier.as_str();
    if let Some(limits) = &test.time_limits {
        check_time_limits(limits, &child(root, "timeLimits"), items);
    }
    check_feedbacks(pkg, test, root, &test.test_feedbacks, items);

    let mut seen = BTreeSet::new();
    visit_structure(test, &mut |path, part, node| {
        let (identifier, control, limits) = match node {
            StructureNode::Part(p) => (&p.identifier, &p.item_session_control, &p.time_limits),
            StructureNode::Section(s) => (&s.identifier, &s.item_session_control, &s.time_limits),
            StructureNode::ItemRef(r) => (&r.identifier, &r.item_session_control, &r.time_limits),
        };
        if !seen.insert(identifier.as_str()) {
            items.push(ValidationItem::error(
                PASS,
                path,
                format!("identifier '{}' is used more than once in the test", identifier),
            ));
        }
        if let Some(control) = control {
            check_session_control(control, &child(path, "itemSessionControl"), items);
        }
        if let Some(limits) = limits {
            check_time_limits(limits, &child(path, "timeLimits"), items);
        }

        match node {
            StructureNode::Part(p) => {
                if p.sections.is_empty() {
                    items.push(ValidationItem::error(
                        PASS,
                        path,
                        format!("testPart '{}' has no assessmentSections", p.identifier),
                    ));
                }
                check_feedbacks(pkg, test, path, &p.test_feedbacks, items);
            }
            StructureNode::Section(s) => {
                if s.parts.is_empty() {
                    items.push(ValidationItem::warning(
                        PASS,
                        path,
                        format!("section '{}' is empty", s.identifier),
                    ));
                }
                if let Some(selection) = &s.selection {
                    let selection_path = child(path, "selection");
                    let required = s.parts.iter().filter(|sp| sp.required()).count();
                    if selection.select == 0 {
                        items.push(ValidationItem::warning(
                            PASS,
                            &selection_path,
                            "select is 0, the section never presents anything",
                        ));
                    }
                    if selection.select < required {
                        items.push(ValidationItem::error(
                            PASS,
                            &selection_path,
                            format!(
                                "select {} is smaller than the {} required children",
                                selection.select, required
                            ),
                        ));
                    }
                    if !selection.with_replacement && selection.select > s.parts.len() {
                        items.push(ValidationItem::error(
                            PASS,
                            &selection_path,
                            format!(
                                "select {} exceeds the {} children and withReplacement is false",
                                selection.select,
                                s.parts.len()
                            ),
                        ));
                    }
                }
            }
            StructureNode::ItemRef(r) => {
                if !pkg.has_item_document(&r.href) {
                    items.push(ValidationItem::error(
                        PASS,
                        path,
                        format!(
                            "item ref '{}' points at '{}', which is not an item in the package",
                            r.identifier, r.href
                        ),
                    ));
                    return;
                }
                let Some(item) = pkg.item(&r.href) else {
                    return;
                };
                if item.adaptive && part.submission_mode == SubmissionMode::Simultaneous {
                    items.push(ValidationItem::warning(
                        PASS,
                        path,
                        format!(
                            "adaptive item '{}' in simultaneous testPart '{}' gets a single attempt",
                            item.identifier, part.identifier
                        ),
                    ));
                }
                for (i, td) in r.template_defaults.iter().enumerate() {
                    let is_template = item
                        .declaration(&td.template_identifier)
                        .is_some_and(|d| d.kind() == VariableKind::Template);
                    if !is_template {
                        items.push(ValidationItem::error(
                            PASS,
                            indexed(path, "templateDefaults", i),
                            format!(
                                "'{}' is not a template variable of item '{}'",
                                td.template_identifier, item.identifier
                            ),
                        ));
                    }
                }
            }
        }
    });
}

fn check_session_control(control: &ItemSessionControl, path: &str, items: &mut Vec<ValidationItem>) {
    if control.max_attempts.is_some_and(|n| n < 0) {
        items.push(ValidationItem::error(
            PASS,
            path,
            "maxAttempts cannot be negative",
        ));
    }
}

fn check_time_limits(limits: &TimeLimits, path: &str, items: &mut Vec<ValidationItem>) {
    for (field, value) in [("minTime", limits.min_time), ("maxTime", limits.max_time)] {
        if value.is_some_and(|v| v < 0.0) {
            items.push(ValidationItem::error(
                PASS,
                path,
                format!("{} cannot be negative", field),
            ));
        }
    }
    if let (Some(min), Some(max)) = (limits.min_time, limits.max_time) {
        if min > max {
            items.push(ValidationItem::error(
                PASS,
                path,
                "minTime is greater than maxTime",
            ));
        }
    }
    if limits.min_time.is_some() {
        items.push(ValidationItem::info(
            PASS,
            path,
            "minTime is recorded but not enforced",
        ));
    }
}

fn check_feedbacks(
    pkg: &ValidationPackage,
    test: &AssessmentTest,
    path: &str,
    feedbacks: &[TestFeedback],
    items: &mut Vec<ValidationItem>,
) {
    for (i, feedback) in feedbacks.iter().enumerate() {
        let declared = matches!(
            pkg.lookup(Document::Test(test), &feedback.outcome_identifier),
            Lookup::Declared(d) if d.kind() == VariableKind::Outcome
        );
        if !declared {
            items.push(ValidationItem::error(
                PASS,
                indexed(path, "testFeedbacks", i),
                format!(
                    "testFeedback '{}' uses undeclared outcome '{}'",
                    feedback.identifier, feedback.outcome_identifier
                ),
            ));
        }
    }
}
