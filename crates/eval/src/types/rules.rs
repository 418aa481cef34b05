//! Processing rule trees for template, response and outcome processing.
//!
//! Rule nodes are `{"rule": "<qti class name>", ...}`. Conditions carry an
//! `if` branch, an optional `elseIf` list and an optional `else` branch,
//! each `{"expression": ..., "rules": [...]}` (`else` has no expression).

use super::expression::{parse_expression, Expression};
use super::{get_str, obj_list, EvalError};

/// Which processing pass a condition or fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    Template,
    Response,
    Outcome,
}

impl RuleScope {
    pub fn name(&self) -> &'static str {
        match self {
            RuleScope::Template => "template",
            RuleScope::Response => "response",
            RuleScope::Outcome => "outcome",
        }
    }
}

/// What a set-value rule writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetTarget {
    Outcome,
    Response,
    Template,
    /// Overrides the correct response of a response variable.
    CorrectResponse,
    /// Overrides the default value of a response or outcome variable.
    DefaultValue,
}

impl SetTarget {
    pub fn rule_name(&self) -> &'static str {
        match self {
            SetTarget::Outcome => "setOutcomeValue",
            SetTarget::Response => "setResponseValue",
            SetTarget::Template => "setTemplateValue",
            SetTarget::CorrectResponse => "setCorrectResponse",
            SetTarget::DefaultValue => "setDefaultValue",
        }
    }
}

/// Early-exit rule kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Response,
    Test,
    Template,
}

impl ExitKind {
    pub fn rule_name(&self) -> &'static str {
        match self {
            ExitKind::Response => "exitResponse",
            ExitKind::Test => "exitTest",
            ExitKind::Template => "exitTemplate",
        }
    }
}

/// An `if` or `elseIf` branch.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionBranch {
    pub condition: Expression,
    pub rules: Vec<ProcessingRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingRule {
    Condition {
        scope: RuleScope,
        if_branch: ConditionBranch,
        else_ifs: Vec<ConditionBranch>,
        else_rules: Option<Vec<ProcessingRule>>,
    },
    SetValue {
        target: SetTarget,
        identifier: String,
        expression: Expression,
    },
    LookupOutcomeValue {
        identifier: String,
        expression: Expression,
    },
    Exit(ExitKind),
    /// A false or NULL constraint aborts the template processing run.
    TemplateConstraint(Expression),
    Fragment {
        scope: RuleScope,
        rules: Vec<ProcessingRule>,
    },
}

impl ProcessingRule {
    /// QTI class name of this rule.
    pub fn class_name(&self) -> &'static str {
        match self {
            ProcessingRule::Condition { scope, .. } => match scope {
                RuleScope::Template => "templateCondition",
                RuleScope::Response => "responseCondition",
                RuleScope::Outcome => "outcomeCondition",
            },
            ProcessingRule::SetValue { target, .. } => target.rule_name(),
            ProcessingRule::LookupOutcomeValue { .. } => "lookupOutcomeValue",
            ProcessingRule::Exit(kind) => kind.rule_name(),
            ProcessingRule::TemplateConstraint(_) => "templateConstraint",
            ProcessingRule::Fragment { scope, .. } => match scope {
                RuleScope::Template => "templateProcessingFragment",
                RuleScope::Response => "responseProcessingFragment",
                RuleScope::Outcome => "outcomeProcessingFragment",
            },
        }
    }

    /// Name used for the `if` branch in diagnostic paths.
    pub fn if_name(scope: RuleScope) -> &'static str {
        match scope {
            RuleScope::Template => "templateIf",
            RuleScope::Response => "responseIf",
            RuleScope::Outcome => "outcomeIf",
        }
    }

    pub fn else_if_name(scope: RuleScope) -> &'static str {
        match scope {
            RuleScope::Template => "templateElseIf",
            RuleScope::Response => "responseElseIf",
            RuleScope::Outcome => "outcomeElseIf",
        }
    }

    pub fn else_name(scope: RuleScope) -> &'static str {
        match scope {
            RuleScope::Template => "templateElse",
            RuleScope::Response => "responseElse",
            RuleScope::Outcome => "outcomeElse",
        }
    }
}

// ──────────────────────────────────────────────
// Parsing
// ──────────────────────────────────────────────

fn parse_branch(v: &serde_json::Value, what: &str) -> Result<ConditionBranch, EvalError> {
    let condition = v
        .get("expression")
        .ok_or_else(|| EvalError::deserialize(format!("{} branch missing 'expression'", what)))?;
    Ok(ConditionBranch {
        condition: parse_expression(condition)?,
        rules: parse_rules(obj_list(v, "rules")?)?,
    })
}

fn required_expression(v: &serde_json::Value, class: &str) -> Result<Expression, EvalError> {
    let e = v
        .get("expression")
        .ok_or_else(|| EvalError::deserialize(format!("{} missing 'expression'", class)))?;
    parse_expression(e)
}

/// Parse a list of rule nodes.
pub fn parse_rules(list: &[serde_json::Value]) -> Result<Vec<ProcessingRule>, EvalError> {
    list.iter().map(parse_rule).collect()
}

/// Parse one rule node.
pub fn parse_rule(v: &serde_json::Value) -> Result<ProcessingRule, EvalError> {
    let class = v
        .get("rule")
        .and_then(|r| r.as_str())
        .ok_or_else(|| EvalError::deserialize("rule missing 'rule'"))?;

    let condition_scope = match class {
        "templateCondition" => Some(RuleScope::Template),
        "responseCondition" => Some(RuleScope::Response),
        "outcomeCondition" => Some(RuleScope::Outcome),
        _ => None,
    };
    if let Some(scope) = condition_scope {
        let if_branch = parse_branch(
            v.get("if")
                .ok_or_else(|| EvalError::deserialize(format!("{} missing 'if'", class)))?,
            "if",
        )?;
        let else_ifs = obj_list(v, "elseIf")?
            .iter()
            .map(|b| parse_branch(b, "elseIf"))
            .collect::<Result<Vec<_>, _>>()?;
        let else_rules = match v.get("else") {
            None | Some(serde_json::Value::Null) => None,
            Some(e) => Some(parse_rules(obj_list(e, "rules")?)?),
        };
        return Ok(ProcessingRule::Condition {
            scope,
            if_branch,
            else_ifs,
            else_rules,
        });
    }

    let set_target = match class {
        "setOutcomeValue" => Some(SetTarget::Outcome),
        "setResponseValue" => Some(SetTarget::Response),
        "setTemplateValue" => Some(SetTarget::Template),
        "setCorrectResponse" => Some(SetTarget::CorrectResponse),
        "setDefaultValue" => Some(SetTarget::DefaultValue),
        _ => None,
    };
    if let Some(target) = set_target {
        return Ok(ProcessingRule::SetValue {
            target,
            identifier: get_str(v, "identifier")?,
            expression: required_expression(v, class)?,
        });
    }

    Ok(match class {
        "lookupOutcomeValue" => ProcessingRule::LookupOutcomeValue {
            identifier: get_str(v, "identifier")?,
            expression: required_expression(v, class)?,
        },
        "exitResponse" => ProcessingRule::Exit(ExitKind::Response),
        "exitTest" => ProcessingRule::Exit(ExitKind::Test),
        "exitTemplate" => ProcessingRule::Exit(ExitKind::Template),
        "templateConstraint" => ProcessingRule::TemplateConstraint(required_expression(v, class)?),
        "templateProcessingFragment" => ProcessingRule::Fragment {
            scope: RuleScope::Template,
            rules: parse_rules(obj_list(v, "rules")?)?,
        },
        "responseProcessingFragment" => ProcessingRule::Fragment {
            scope: RuleScope::Response,
            rules: parse_rules(obj_list(v, "rules")?)?,
        },
        "outcomeProcessingFragment" => ProcessingRule::Fragment {
            scope: RuleScope::Outcome,
            rules: parse_rules(obj_list(v, "rules")?)?,
        },
        other => return Err(EvalError::unknown("rule", other)),
    })
}
