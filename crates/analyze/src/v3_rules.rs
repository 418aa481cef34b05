//! V3 -- Processing rules.
//!
//! Every rule must be allowed in the processing pass that holds it, must
//! write to a declared variable of the right family, and must assign a
//! value the target can hold. lookupOutcomeValue targets need a lookup
//! table; conditions and template constraints need boolean expressions.

use qti_eval::types::declarations::{is_builtin, COMPLETION_STATUS};
use qti_eval::types::{
    BaseType, Cardinality, ExitKind, LookupTable, ProcessingRule, RuleScope, SetTarget,
    VariableDeclaration, VariableKind,
};

use crate::package::{Document, Lookup, ValidationPackage};
use crate::report::ValidationItem;
use crate::walk::{produced, rule_expressions, rule_lists, visit_rules};

const PASS: &str = "v3";

/// V3 -- check every processing rule of every built document.
pub fn check_rules(package: &ValidationPackage) -> Vec<ValidationItem> {
    let mut items = Vec::new();
    for doc in package.documents() {
        for list in rule_lists(doc) {
            visit_rules(doc.identifier(), list.field, list.rules, &mut |path, rule| {
                check_rule(package, doc, list.scope, path, rule, &mut items)
            });
        }
    }
    items
}

/// Processing passes a rule may appear in.
fn allowed_scopes(rule: &ProcessingRule) -> &'static [RuleScope] {
    use RuleScope::*;
    match rule {
        ProcessingRule::Condition { scope, .. } | ProcessingRule::Fragment { scope, .. } => {
            match scope {
                Template => &[Template],
                Response => &[Response],
                Outcome => &[Outcome],
            }
        }
        ProcessingRule::SetValue { target, .. } => match target {
            SetTarget::Outcome => &[Response, Outcome],
            SetTarget::Response => &[Response],
            SetTarget::Template | SetTarget::CorrectResponse | SetTarget::DefaultValue => {
                &[Template]
            }
        },
        ProcessingRule::LookupOutcomeValue { .. } => &[Response, Outcome],
        ProcessingRule::Exit(kind) => match kind {
            ExitKind::Response => &[Response],
            ExitKind::Test => &[Outcome],
            ExitKind::Template => &[Template],
        },
        ProcessingRule::TemplateConstraint(_) => &[Template],
    }
}

fn check_rule(
    pkg: &ValidationPackage,
    doc: Document<'_>,
    scope: RuleScope,
    path: &str,
    rule: &ProcessingRule,
    items: &mut Vec<ValidationItem>,
) {
    if !allowed_scopes(rule).contains(&scope) {
        items.push(ValidationItem::error(
            PASS,
            path,
            format!(
                "{} is not allowed in {} processing",
                rule.class_name(),
                scope.name()
            ),
        ));
    }

    match rule {
        ProcessingRule::SetValue {
            target,
            identifier,
            expression,
        } => {
            let families: &[VariableKind] = match target {
                SetTarget::Outcome => &[VariableKind::Outcome],
                SetTarget::Response | SetTarget::CorrectResponse => &[VariableKind::Response],
                SetTarget::Template => &[VariableKind::Template],
                SetTarget::DefaultValue => &[VariableKind::Response, VariableKind::Outcome],
            };
            let Some(d) = target_declaration(pkg, doc, path, rule, identifier, families, items)
            else {
                return;
            };
            if is_builtin(identifier) && identifier != COMPLETION_STATUS {
                items.push(ValidationItem::warning(
                    PASS,
                    path,
                    format!(
                        "built-in variable '{}' is maintained by the session and will be overwritten",
                        identifier
                    ),
                ));
            }
            let (cardinality, base_type) = produced(pkg, doc, expression);
            check_assignment(d, cardinality, base_type, path, rule, items);
        }
        ProcessingRule::LookupOutcomeValue {
            identifier,
            expression,
        } => {
            let Some(d) = target_declaration(
                pkg,
                doc,
                path,
                rule,
                identifier,
                &[VariableKind::Outcome],
                items,
            ) else {
                return;
            };
            match d.lookup_table() {
                None => items.push(ValidationItem::error(
                    PASS,
                    path,
                    format!("lookupOutcomeValue target '{}' has no lookup table", identifier),
                )),
                Some(table) => {
                    let source = produced(pkg, doc, expression).1;
                    match (table, source) {
                        (_, Some(bt)) if !bt.is_numeric() => items.push(ValidationItem::error(
                            PASS,
                            path,
                            format!("lookup source must be numeric, got {}", bt.name()),
                        )),
                        (LookupTable::Match(_), Some(BaseType::Float)) => {
                            items.push(ValidationItem::warning(
                                PASS,
                                path,
                                "matchTable sources are integers; a float source only matches whole values",
                            ))
                        }
                        _ => {}
                    }
                }
            }
        }
        ProcessingRule::Condition { .. } | ProcessingRule::TemplateConstraint(_) => {
            for (field, expr) in rule_expressions(path, rule) {
                let (cardinality, base_type) = produced(pkg, doc, expr);
                let boolean = base_type.map_or(true, |bt| bt == BaseType::Boolean)
                    && cardinality.map_or(true, |c| c == Cardinality::Single);
                if !boolean {
                    items.push(ValidationItem::error(
                        PASS,
                        field,
                        format!(
                            "{} must be a single boolean, got {} {}",
                            expr.class_name(),
                            cardinality.map(|c| c.name()).unwrap_or("?"),
                            base_type.map(|b| b.name()).unwrap_or("?")
                        ),
                    ));
                }
            }
        }
        ProcessingRule::Exit(_) | ProcessingRule::Fragment { .. } => {}
    }
}

/// Resolve the variable a rule writes to, reporting a missing or
/// wrong-family target.
fn target_declaration<'a>(
    pkg: &'a ValidationPackage,
    doc: Document<'a>,
    path: &str,
    rule: &ProcessingRule,
    identifier: &str,
    families: &[VariableKind],
    items: &mut Vec<ValidationItem>,
) -> Option<&'a VariableDeclaration> {
    let d = match pkg.lookup(doc, identifier) {
        Lookup::Declared(d) => d,
        Lookup::Unresolved => return None,
        Lookup::Undeclared => {
            items.push(ValidationItem::error(
                PASS,
                path,
                format!("{} target '{}' is not declared", rule.class_name(), identifier),
            ));
            return None;
        }
    };
    if identifier.contains('.') {
        items.push(ValidationItem::error(
            PASS,
            path,
            format!(
                "{} cannot write to '{}' in another item",
                rule.class_name(),
                identifier
            ),
        ));
        return None;
    }
    if !families.contains(&d.kind()) {
        let wanted: Vec<&str> = families.iter().map(|k| k.name()).collect();
        items.push(ValidationItem::error(
            PASS,
            path,
            format!(
                "{} target '{}' is of kind {}, expected {}",
                rule.class_name(),
                identifier,
                d.kind().name(),
                wanted.join(" or ")
            ),
        ));
        return None;
    }
    Some(d)
}

fn check_assignment(
    d: &VariableDeclaration,
    cardinality: Option<Cardinality>,
    base_type: Option<BaseType>,
    path: &str,
    rule: &ProcessingRule,
    items: &mut Vec<ValidationItem>,
) {
    if let Some(c) = cardinality {
        if c != d.cardinality {
            items.push(ValidationItem::error(
                PASS,
                path,
                format!(
                    "{} assigns a {} value to {} variable '{}'",
                    rule.class_name(),
                    c,
                    d.cardinality,
                    d.identifier
                ),
            ));
        }
    }
    if let (Some(bt), Some(target)) = (base_type, d.base_type) {
        let promotes = bt == BaseType::Integer && target == BaseType::Float;
        if bt != target && !promotes {
            items.push(ValidationItem::error(
                PASS,
                path,
                format!(
                    "{} assigns a {} value to {} variable '{}'",
                    rule.class_name(),
                    bt.name(),
                    target.name(),
                    d.identifier
                ),
            ));
        }
    }
}
