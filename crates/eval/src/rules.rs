//! Processing rule interpreter.
//!
//! Rules run strictly top to bottom. Early exits (`exitResponse`,
//! `exitTest`, `exitTemplate`) and failed template constraints travel
//! back up as a [`RuleOutcome`] instead of unwinding, and are consumed by
//! the session at the boundary of the processing run.

use std::iter;

use crate::context::EvalContext;
use crate::expression::evaluate;
use crate::mapping;
use crate::types::{EvalError, ProcessingRule, SetTarget, Value, VariableKind};

/// How a rule (or rule list) finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Continue,
    /// An exit rule ran: abandon the rest of this processing run.
    ExitProcessing,
    /// A template constraint failed: the template run must start over.
    RetryTemplate,
}

/// Execute a rule list, stopping at the first non-`Continue` outcome.
pub fn execute_rules(
    rules: &[ProcessingRule],
    ctx: &mut EvalContext<'_>,
) -> Result<RuleOutcome, EvalError> {
    for rule in rules {
        let outcome = execute_rule(rule, ctx)?;
        if outcome != RuleOutcome::Continue {
            return Ok(outcome);
        }
    }
    Ok(RuleOutcome::Continue)
}

pub fn execute_rule(
    rule: &ProcessingRule,
    ctx: &mut EvalContext<'_>,
) -> Result<RuleOutcome, EvalError> {
    match rule {
        ProcessingRule::Condition {
            if_branch,
            else_ifs,
            else_rules,
            ..
        } => {
            for branch in iter::once(if_branch).chain(else_ifs) {
                if evaluate(&branch.condition, ctx)?.as_bool() == Some(true) {
                    return execute_rules(&branch.rules, ctx);
                }
            }
            match else_rules {
                Some(rules) => execute_rules(rules, ctx),
                None => Ok(RuleOutcome::Continue),
            }
        }

        ProcessingRule::SetValue {
            target,
            identifier,
            expression,
        } => {
            let value = evaluate(expression, ctx)?;
            assign(ctx, *target, identifier, value)?;
            Ok(RuleOutcome::Continue)
        }

        ProcessingRule::LookupOutcomeValue {
            identifier,
            expression,
        } => {
            let source = evaluate(expression, ctx)?;
            let looked_up = match ctx.scope.declaration(identifier) {
                None => Err(format!(
                    "lookupOutcomeValue: undeclared outcome '{}'",
                    identifier
                )),
                Some(decl) => match decl.lookup_table() {
                    None => Err(format!(
                        "lookupOutcomeValue: outcome '{}' has no lookup table",
                        identifier
                    )),
                    Some(table) => Ok(decl.coerce(mapping::lookup(table, decl, &source))),
                },
            };
            match looked_up {
                Ok(value) => ctx.scope.set_value(identifier, value)?,
                Err(message) => ctx.warn(message),
            }
            Ok(RuleOutcome::Continue)
        }

        ProcessingRule::Exit(kind) => {
            tracing::debug!(rule = kind.rule_name(), "exiting processing");
            Ok(RuleOutcome::ExitProcessing)
        }

        ProcessingRule::TemplateConstraint(expression) => {
            if evaluate(expression, ctx)?.as_bool() == Some(true) {
                Ok(RuleOutcome::Continue)
            } else {
                Ok(RuleOutcome::RetryTemplate)
            }
        }

        ProcessingRule::Fragment { rules, .. } => execute_rules(rules, ctx),
    }
}

/// Write a rule's value to its target, after checking the target's kind and
/// type. Mismatches are reported as warnings and leave the target unchanged.
fn assign(
    ctx: &mut EvalContext<'_>,
    target: SetTarget,
    identifier: &str,
    value: Value,
) -> Result<(), EvalError> {
    let checked = match ctx.scope.declaration(identifier) {
        None => Err(format!(
            "{}: undeclared variable '{}'",
            target.rule_name(),
            identifier
        )),
        Some(decl) => {
            let kind_ok = match target {
                SetTarget::Outcome => decl.kind() == VariableKind::Outcome,
                SetTarget::Response | SetTarget::CorrectResponse => {
                    decl.kind() == VariableKind::Response
                }
                SetTarget::Template => decl.kind() == VariableKind::Template,
                SetTarget::DefaultValue => decl.kind() != VariableKind::Template,
            };
            let value = decl.coerce(value);
            if !kind_ok {
                Err(format!(
                    "{}: '{}' is a {} variable",
                    target.rule_name(),
                    identifier,
                    decl.kind().name()
                ))
            } else if !decl.accepts(&value) {
                Err(format!(
                    "{}: {} value does not fit '{}' ({} {})",
                    target.rule_name(),
                    value.describe(),
                    identifier,
                    decl.cardinality,
                    decl.base_type.map(|b| b.name()).unwrap_or("record")
                ))
            } else {
                Ok(value)
            }
        }
    };
    match checked {
        Ok(value) => match target {
            SetTarget::CorrectResponse => ctx.scope.set_correct_response(identifier, value),
            SetTarget::DefaultValue => ctx.scope.set_default_value(identifier, value),
            _ => ctx.scope.set_value(identifier, value),
        },
        Err(message) => {
            ctx.warn(message);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_scope::MapScope;
    use crate::context::RuntimeNotifications;
    use crate::types::rules::parse_rules;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn run(scope: &mut MapScope, rules: serde_json::Value) -> (RuleOutcome, RuntimeNotifications) {
        let rules = parse_rules(rules.as_array().unwrap()).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let mut notes = RuntimeNotifications::new();
        let outcome = {
            let mut ctx = EvalContext::new(scope, &mut rng, &mut notes);
            execute_rules(&rules, &mut ctx).unwrap()
        };
        (outcome, notes)
    }

    fn int(i: i64) -> serde_json::Value {
        json!({"expr": "baseValue", "baseType": "integer", "value": i})
    }

    fn var(id: &str) -> serde_json::Value {
        json!({"expr": "variable", "identifier": id})
    }

    fn set(id: &str, expr: serde_json::Value) -> serde_json::Value {
        json!({"rule": "setOutcomeValue", "identifier": id, "expression": expr})
    }

    fn is(id: &str, i: i64) -> serde_json::Value {
        json!({"expr": "match", "args": [var(id), int(i)]})
    }

    fn outcomes() -> MapScope {
        MapScope::default()
            .declare(
                VariableKind::Outcome,
                json!({"identifier": "X", "cardinality": "single", "baseType": "integer"}),
            )
            .declare(
                VariableKind::Outcome,
                json!({"identifier": "SCORE", "cardinality": "single", "baseType": "float",
                    "defaultValue": 0}),
            )
    }

    fn condition(x: i64) -> (MapScope, RuleOutcome) {
        let mut scope = outcomes().with("X", Value::integer(x));
        let (outcome, _) = run(
            &mut scope,
            json!([{
                "rule": "responseCondition",
                "if": {"expression": is("X", 1), "rules": [set("SCORE", int(1))]},
                "elseIf": [
                    {"expression": is("X", 2), "rules": [set("SCORE", int(2))]},
                    {"expression": is("X", 3), "rules": [set("SCORE", int(3))]}
                ]
            }]),
        );
        (scope, outcome)
    }

    #[test]
    fn exactly_one_branch_runs() {
        for x in 1..=3 {
            let (scope, outcome) = condition(x);
            assert_eq!(outcome, RuleOutcome::Continue);
            assert_eq!(scope.get("SCORE"), Value::float(x as f64));
        }
        let (scope, _) = condition(9);
        assert_eq!(scope.get("SCORE"), Value::float(0.0));
    }

    #[test]
    fn exit_in_nested_else_if_aborts_whole_run() {
        let mut scope = outcomes().with("X", Value::integer(2));
        let (outcome, _) = run(
            &mut scope,
            json!([
                {
                    "rule": "responseCondition",
                    "if": {"expression": is("X", 1), "rules": []},
                    "elseIf": [{"expression": is("X", 2), "rules": [
                        {"rule": "responseProcessingFragment", "rules": [
                            set("SCORE", int(5)),
                            {"rule": "exitResponse"},
                            set("SCORE", int(6))
                        ]}
                    ]}]
                },
                set("SCORE", int(7))
            ]),
        );
        assert_eq!(outcome, RuleOutcome::ExitProcessing);
        assert_eq!(scope.get("SCORE"), Value::float(5.0));
    }

    #[test]
    fn template_constraint_requests_retry() {
        let mut scope = outcomes();
        let (outcome, _) = run(
            &mut scope,
            json!([
                {"rule": "templateConstraint", "expression": {"expr": "null"}},
                set("X", int(1))
            ]),
        );
        assert_eq!(outcome, RuleOutcome::RetryTemplate);
        assert_eq!(scope.get("X"), Value::Null);
    }

    #[test]
    fn lookup_uses_table_default_for_null_source() {
        let mut scope = MapScope::default().declare(
            VariableKind::Outcome,
            json!({"identifier": "GRADE", "cardinality": "single", "baseType": "identifier",
                "lookupTable": {"matchTable": {"defaultValue": "none", "entries": [
                    {"sourceValue": 1, "targetValue": "high"}
                ]}}}),
        );
        run(
            &mut scope,
            json!([{"rule": "lookupOutcomeValue", "identifier": "GRADE",
                "expression": {"expr": "null"}}]),
        );
        assert_eq!(scope.get("GRADE"), Value::identifier("none"));
        run(
            &mut scope,
            json!([{"rule": "lookupOutcomeValue", "identifier": "GRADE", "expression": int(1)}]),
        );
        assert_eq!(scope.get("GRADE"), Value::identifier("high"));
    }

    #[test]
    fn lookup_without_table_warns() {
        let mut scope = outcomes();
        let (_, notes) = run(
            &mut scope,
            json!([{"rule": "lookupOutcomeValue", "identifier": "X", "expression": int(1)}]),
        );
        assert_eq!(notes.warnings().count(), 1);
        assert_eq!(scope.get("X"), Value::Null);
    }

    #[test]
    fn mismatched_assignment_is_skipped_with_warning() {
        let mut scope = outcomes();
        let (_, notes) = run(
            &mut scope,
            json!([set("X", json!({"expr": "baseValue", "baseType": "string", "value": "no"}))]),
        );
        assert_eq!(scope.get("X"), Value::Null);
        assert_eq!(notes.warnings().count(), 1);
    }

    #[test]
    fn set_correct_and_default_overrides() {
        let mut scope = MapScope::default().declare(
            VariableKind::Response,
            json!({"identifier": "R", "cardinality": "single", "baseType": "integer"}),
        );
        run(
            &mut scope,
            json!([
                {"rule": "setCorrectResponse", "identifier": "R", "expression": int(4)},
                {"rule": "setDefaultValue", "identifier": "R", "expression": int(2)}
            ]),
        );
        assert_eq!(scope.correct.get("R"), Some(&Value::integer(4)));
        assert_eq!(scope.defaults.get("R"), Some(&Value::integer(2)));
    }
}
