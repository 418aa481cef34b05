//! Expression evaluator.
//!
//! A strict, depth-first, left-to-right tree walk: every node evaluates all
//! of its children before computing its own result. Operands an operator
//! cannot use (NULL, wrong base type, wrong cardinality) produce
//! `Value::Null`; only internal defects and fatal CAS failures are errors.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::cas::{CasError, CasFailurePolicy};
use crate::context::{DottedValue, EvalContext, ItemView};
use crate::mapping;
use crate::numeric;
use crate::types::{
    BaseType, Cardinality, EvalError, Expression, ItemSubset, Operator, SingleValue, SubsetKind,
    Value,
};

/// Evaluate an expression in the given context.
pub fn evaluate(expr: &Expression, ctx: &mut EvalContext<'_>) -> Result<Value, EvalError> {
    match expr {
        Expression::BaseValue(v) => Ok(v.clone()),
        Expression::Null => Ok(Value::Null),

        Expression::Variable {
            identifier,
            weight_identifier,
        } => Ok(variable(ctx, identifier, weight_identifier.as_deref())),

        Expression::Default(identifier) => {
            let found = ctx.scope.default_value(identifier);
            Ok(found.unwrap_or_else(|| {
                ctx.warn(format!("default: undeclared variable '{}'", identifier));
                Value::Null
            }))
        }

        Expression::Correct(identifier) => {
            let found = ctx.scope.correct_response(identifier);
            Ok(found.unwrap_or_else(|| {
                ctx.warn(format!("correct: undeclared response '{}'", identifier));
                Value::Null
            }))
        }

        Expression::MapResponse(identifier) => {
            let result = match ctx.scope.declaration(identifier) {
                None => Err(format!("mapResponse: undeclared response '{}'", identifier)),
                Some(decl) => match decl.mapping() {
                    None => Err(format!(
                        "mapResponse: response '{}' has no mapping",
                        identifier
                    )),
                    Some(m) => {
                        let value = ctx.scope.value(identifier).unwrap_or(Value::Null);
                        Ok(mapping::map_response(m, decl.cardinality, &value))
                    }
                },
            };
            Ok(or_warn(ctx, result))
        }

        Expression::MapResponsePoint(identifier) => {
            let result = match ctx.scope.declaration(identifier) {
                None => Err(format!(
                    "mapResponsePoint: undeclared response '{}'",
                    identifier
                )),
                Some(decl) => match decl.area_mapping() {
                    None => Err(format!(
                        "mapResponsePoint: response '{}' has no area mapping",
                        identifier
                    )),
                    Some(m) => {
                        let value = ctx.scope.value(identifier).unwrap_or(Value::Null);
                        Ok(mapping::map_response_point(m, &value))
                    }
                },
            };
            Ok(or_warn(ctx, result))
        }

        Expression::RandomInteger { min, max, step } => {
            if *step < 1 || max < min {
                return Ok(Value::Null);
            }
            let Some(span) = max.checked_sub(*min) else {
                return Ok(Value::Null);
            };
            let k = ctx.rng.gen_range(0..=span / step);
            Ok(Value::integer(min + step * k))
        }

        Expression::RandomFloat { min, max } => {
            if max < min {
                return Ok(Value::Null);
            }
            if max == min {
                return Ok(Value::float(*min));
            }
            Ok(Value::float(ctx.rng.gen_range(*min..=*max)))
        }

        Expression::MathConstant(constant) => match ctx.cas {
            Some(cas) => match cas.math_constant(constant.name()) {
                Ok(v) => Ok(v),
                Err(e) => cas_failure(ctx, e),
            },
            None => Ok(Value::float(constant.value())),
        },

        Expression::MathOperator { operator, args } => {
            let values = eval_args(args, ctx)?;
            let spec =
                numeric::math_operator_spec(*operator).ok_or_else(|| EvalError::Internal {
                    message: format!("no function for mathOperator {:?}", operator),
                })?;
            let Some(xs) = numbers(&values) else {
                return Ok(Value::Null);
            };
            match ctx.cas {
                Some(cas) => match cas.evaluate_math(spec.name, &values) {
                    Ok(v) => Ok(v),
                    Err(e) => cas_failure(ctx, e),
                },
                None => Ok(numeric::apply_math(spec, &xs)),
            }
        }

        Expression::StatsOperator { operator, args } => {
            let values = eval_args(args, ctx)?;
            Ok(match values.first() {
                Some(container @ (Value::Multiple { .. } | Value::Ordered { .. })) => container
                    .elements()
                    .iter()
                    .map(SingleValue::as_f64)
                    .collect::<Option<Vec<f64>>>()
                    .map(|xs| numeric::stats(*operator, &xs))
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            })
        }

        Expression::Equal {
            tolerance_mode,
            tolerances,
            include_lower_bound,
            include_upper_bound,
            args,
        } => {
            let values = eval_args(args, ctx)?;
            Ok(match numbers(&values).as_deref() {
                Some([x, y]) => Value::boolean(numeric::equal_with_tolerance(
                    *x,
                    *y,
                    *tolerance_mode,
                    tolerances,
                    *include_lower_bound,
                    *include_upper_bound,
                )),
                _ => Value::Null,
            })
        }

        Expression::EqualRounded {
            rounding_mode,
            figures,
            args,
        } => {
            let values = eval_args(args, ctx)?;
            Ok(match numbers(&values).as_deref() {
                Some([x, y]) => numeric::equal_rounded(*x, *y, *rounding_mode, *figures)
                    .map(Value::boolean)
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            })
        }

        Expression::RoundTo {
            rounding_mode,
            figures,
            args,
        } => {
            let values = eval_args(args, ctx)?;
            Ok(match numbers(&values).as_deref() {
                Some([x]) => numeric::round_to(*x, *rounding_mode, *figures),
                _ => Value::Null,
            })
        }

        Expression::AnyN { min, max, args } => {
            let values = eval_args(args, ctx)?;
            Ok(any_n(*min, *max, &values))
        }

        Expression::Inside {
            shape,
            coords,
            args,
        } => {
            let values = eval_args(args, ctx)?;
            let Some(v) = values.first().filter(|v| !v.is_null()) else {
                return Ok(Value::Null);
            };
            if v.base_type() != Some(BaseType::Point) {
                return Ok(Value::Null);
            }
            Ok(Value::boolean(v.elements().iter().any(|p| match p {
                SingleValue::Point(x, y) => shape.contains(coords, *x, *y),
                _ => false,
            })))
        }

        Expression::StringMatch {
            case_sensitive,
            substring,
            args,
        } => {
            let values = eval_args(args, ctx)?;
            let (Some(a), Some(b)) = (text(values.first()), text(values.get(1))) else {
                return Ok(Value::Null);
            };
            let (a, b) = if *case_sensitive {
                (a.to_string(), b.to_string())
            } else {
                (a.to_lowercase(), b.to_lowercase())
            };
            Ok(Value::boolean(if *substring {
                b.contains(&a)
            } else {
                a == b
            }))
        }

        Expression::PatternMatch { pattern, args } => {
            let values = eval_args(args, ctx)?;
            let Some(s) = text(values.first()) else {
                return Ok(Value::Null);
            };
            let re = regex::Regex::new(&numeric::anchored_pattern(pattern)).map_err(|e| {
                EvalError::Internal {
                    message: format!("pattern '{}' no longer compiles: {}", pattern, e),
                }
            })?;
            Ok(Value::boolean(re.is_match(s)))
        }

        Expression::Index { n, args } => {
            let values = eval_args(args, ctx)?;
            Ok(match values.first() {
                Some(Value::Ordered { values, .. }) if *n >= 1 => usize::try_from(*n - 1)
                    .ok()
                    .and_then(|i| values.get(i))
                    .map(|v| Value::Single(v.clone()))
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            })
        }

        Expression::FieldValue {
            field_identifier,
            args,
        } => {
            let values = eval_args(args, ctx)?;
            Ok(match values.first() {
                Some(Value::Record(fields)) => {
                    fields.get(field_identifier).cloned().unwrap_or(Value::Null)
                }
                _ => Value::Null,
            })
        }

        Expression::ItemSubset(subset) => Ok(item_subset(subset, ctx)),

        Expression::Operator { operator, args } => {
            let values = eval_args(args, ctx)?;
            apply_operator(*operator, values, ctx)
        }
    }
}

/// Evaluate children left to right.
fn eval_args(args: &[Expression], ctx: &mut EvalContext<'_>) -> Result<Vec<Value>, EvalError> {
    args.iter().map(|a| evaluate(a, ctx)).collect()
}

fn or_warn(ctx: &mut EvalContext<'_>, result: Result<Value, String>) -> Value {
    result.unwrap_or_else(|message| {
        ctx.warn(message);
        Value::Null
    })
}

fn cas_failure(ctx: &mut EvalContext<'_>, error: CasError) -> Result<Value, EvalError> {
    match ctx.cas_policy {
        CasFailurePolicy::NullWithWarning => {
            ctx.warn(format!("{}; result is NULL", error));
            Ok(Value::Null)
        }
        CasFailurePolicy::Fatal => Err(EvalError::Cas(error)),
    }
}

// ──────────────────────────────────────────────
// Variables
// ──────────────────────────────────────────────

fn variable(ctx: &mut EvalContext<'_>, identifier: &str, weight: Option<&str>) -> Value {
    if ctx.scope.is_test() {
        if let Some((item_ref, instance, var)) = split_dotted(identifier) {
            let value = match ctx.scope.dotted_value(item_ref, instance, var) {
                DottedValue::Found(v) => v,
                DottedValue::FirstOf { value, instances } => {
                    ctx.warn(format!(
                        "variable '{}': item ref '{}' has {} instances, using the first",
                        identifier, item_ref, instances
                    ));
                    value
                }
                DottedValue::NoInstance => {
                    ctx.warn(format!(
                        "variable '{}': no selected instance of item ref '{}'",
                        identifier, item_ref
                    ));
                    return Value::Null;
                }
                DottedValue::UnknownVariable => {
                    ctx.warn(format!("variable '{}' does not resolve", identifier));
                    return Value::Null;
                }
            };
            return match (weight, value.as_single().and_then(|s| s.as_f64())) {
                (Some(w), Some(x)) => match ctx.scope.item_ref_weight(item_ref, w) {
                    Some(factor) => Value::float(x * factor),
                    None => value,
                },
                _ => value,
            };
        }
    }
    let found = ctx.scope.value(identifier);
    found.unwrap_or_else(|| {
        ctx.warn(format!("undeclared variable '{}'", identifier));
        Value::Null
    })
}

/// Split `itemRef.VAR` or `itemRef.N.VAR`.
fn split_dotted(identifier: &str) -> Option<(&str, Option<usize>, &str)> {
    let (item_ref, rest) = identifier.split_once('.')?;
    if let Some((n, var)) = rest.split_once('.') {
        if let Ok(n) = n.parse::<usize>() {
            return Some((item_ref, Some(n), var));
        }
    }
    Some((item_ref, None, rest))
}

// ──────────────────────────────────────────────
// Operand helpers
// ──────────────────────────────────────────────

/// Numeric view of every operand; `None` if any is NULL or not a numeric single.
fn numbers(values: &[Value]) -> Option<Vec<f64>> {
    values
        .iter()
        .map(|v| v.as_single().and_then(SingleValue::as_f64))
        .collect()
}

/// Integer view of every operand; `None` unless all are single integers.
fn integers(values: &[Value]) -> Option<Vec<i64>> {
    values.iter().map(Value::as_i64).collect()
}

fn text(v: Option<&Value>) -> Option<&str> {
    match v {
        Some(Value::Single(SingleValue::String(s))) => Some(s),
        _ => None,
    }
}

fn duration(v: &Value) -> Option<f64> {
    match v {
        Value::Single(SingleValue::Duration(d)) => Some(*d),
        _ => None,
    }
}

fn any_n_counts(values: &[Value]) -> (i64, i64) {
    let mut trues = 0;
    let mut nulls = 0;
    for v in values {
        match v.as_bool() {
            Some(true) => trues += 1,
            Some(false) => {}
            None => nulls += 1,
        }
    }
    (trues, nulls)
}

fn any_n(min: i64, max: i64, values: &[Value]) -> Value {
    if min > max {
        return Value::boolean(false);
    }
    let (trues, nulls) = any_n_counts(values);
    if trues >= min && trues + nulls <= max {
        Value::boolean(true)
    } else if trues + nulls < min || trues > max {
        Value::boolean(false)
    } else {
        Value::Null
    }
}

/// Floor division: the quotient rounds towards negative infinity.
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn integer_or_float(
    values: &[Value],
    int_op: impl Fn(&[i64]) -> Option<i64>,
    float_op: impl Fn(&[f64]) -> f64,
) -> Value {
    if let Some(is) = integers(values) {
        return int_op(&is).map(Value::integer).unwrap_or(Value::Null);
    }
    match numbers(values) {
        Some(xs) => Value::float(float_op(&xs)),
        None => Value::Null,
    }
}

fn compare(values: &[Value], cmp: impl Fn(f64, f64) -> bool) -> Value {
    match numbers(values).as_deref() {
        Some([a, b]) => Value::boolean(cmp(*a, *b)),
        _ => Value::Null,
    }
}

/// Every element of single or container operands, or `None` if any
/// operand is NULL or a record.
fn flatten(values: &[Value]) -> Option<Vec<SingleValue>> {
    let mut out = Vec::new();
    for v in values {
        match v {
            Value::Null | Value::Record(_) => return None,
            other => out.extend(other.elements().iter().cloned()),
        }
    }
    Some(out)
}

/// Whether `needle` appears in `haystack`: multiset inclusion for
/// multiple containers, a contiguous run for ordered ones.
fn contains(haystack: &Value, needle: &Value) -> Option<bool> {
    match (haystack, needle) {
        (Value::Multiple { values: h, .. }, Value::Multiple { values: n, .. }) => {
            let mut remaining = h.clone();
            for v in n {
                match remaining.iter().position(|r| r == v) {
                    Some(pos) => {
                        remaining.remove(pos);
                    }
                    None => return Some(false),
                }
            }
            Some(true)
        }
        (Value::Ordered { values: h, .. }, Value::Ordered { values: n, .. }) => {
            Some(n.len() <= h.len() && h.windows(n.len()).any(|w| w == n.as_slice()))
        }
        _ => None,
    }
}

/// Build a container from the operands of `multiple` / `ordered`.
/// NULL operands are ignored; mixed base types give NULL.
fn collect_container(cardinality: Cardinality, values: &[Value]) -> Value {
    let mut base_type = None;
    let mut elements = Vec::new();
    for v in values {
        if v.is_null() {
            continue;
        }
        let allowed = match v {
            Value::Single(_) => true,
            Value::Multiple { .. } => cardinality == Cardinality::Multiple,
            Value::Ordered { .. } => cardinality == Cardinality::Ordered,
            _ => false,
        };
        if !allowed {
            return Value::Null;
        }
        let bt = v.base_type();
        if base_type.is_some() && base_type != bt {
            return Value::Null;
        }
        base_type = bt;
        elements.extend(v.elements().iter().cloned());
    }
    match base_type {
        Some(bt) => Value::list(cardinality, bt, elements).unwrap_or(Value::Null),
        None => Value::Null,
    }
}

// ──────────────────────────────────────────────
// Operators
// ──────────────────────────────────────────────

fn apply_operator(
    operator: Operator,
    values: Vec<Value>,
    ctx: &mut EvalContext<'_>,
) -> Result<Value, EvalError> {
    let first = values.first().cloned().unwrap_or(Value::Null);
    let second = values.get(1).cloned().unwrap_or(Value::Null);
    Ok(match operator {
        Operator::And => {
            if values.iter().any(|v| v.as_bool() == Some(false)) {
                Value::boolean(false)
            } else if values.iter().all(|v| v.as_bool() == Some(true)) {
                Value::boolean(true)
            } else {
                Value::Null
            }
        }
        Operator::Or => {
            if values.iter().any(|v| v.as_bool() == Some(true)) {
                Value::boolean(true)
            } else if values.iter().all(|v| v.as_bool() == Some(false)) {
                Value::boolean(false)
            } else {
                Value::Null
            }
        }
        Operator::Not => first
            .as_bool()
            .map(|b| Value::boolean(!b))
            .unwrap_or(Value::Null),
        Operator::IsNull => Value::boolean(match &first {
            Value::Single(SingleValue::String(s)) => s.is_empty(),
            v => v.is_null(),
        }),
        Operator::Match => {
            if first.is_null() || second.is_null() {
                Value::Null
            } else {
                Value::boolean(first == second)
            }
        }

        Operator::Lt => compare(&values, |a, b| a < b),
        Operator::Lte => compare(&values, |a, b| a <= b),
        Operator::Gt => compare(&values, |a, b| a > b),
        Operator::Gte => compare(&values, |a, b| a >= b),
        Operator::DurationLt => match (duration(&first), duration(&second)) {
            (Some(a), Some(b)) => Value::boolean(a < b),
            _ => Value::Null,
        },
        Operator::DurationGte => match (duration(&first), duration(&second)) {
            (Some(a), Some(b)) => Value::boolean(a >= b),
            _ => Value::Null,
        },

        Operator::Sum => integer_or_float(
            &values,
            |is| is.iter().try_fold(0i64, |acc, i| acc.checked_add(*i)),
            |xs| xs.iter().sum(),
        ),
        Operator::Product => integer_or_float(
            &values,
            |is| is.iter().try_fold(1i64, |acc, i| acc.checked_mul(*i)),
            |xs| xs.iter().product(),
        ),
        Operator::Subtract => integer_or_float(
            &values,
            |is| match is {
                [a, b] => a.checked_sub(*b),
                _ => None,
            },
            |xs| match xs {
                [a, b] => a - b,
                _ => f64::NAN,
            },
        ),
        Operator::Divide => match numbers(&values).as_deref() {
            Some([_, b]) if *b == 0.0 => Value::Null,
            Some([a, b]) => Value::float(a / b),
            _ => Value::Null,
        },
        Operator::Power => match numbers(&values).as_deref() {
            Some([a, b]) => Value::float(a.powf(*b)),
            _ => Value::Null,
        },
        Operator::IntegerDivide => match integers(&values).as_deref() {
            Some([a, b]) if *b != 0 => floor_div(*a, *b).map(Value::integer).unwrap_or(Value::Null),
            _ => Value::Null,
        },
        Operator::IntegerModulus => match integers(&values).as_deref() {
            Some([a, b]) if *b != 0 => floor_div(*a, *b)
                .and_then(|q| b.checked_mul(q))
                .and_then(|bq| a.checked_sub(bq))
                .map(Value::integer)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        Operator::Truncate => match numbers(&values).as_deref() {
            Some([x]) => numeric::float_to_integer(x.trunc()),
            _ => Value::Null,
        },
        Operator::Round => match numbers(&values).as_deref() {
            Some([x]) => numeric::qti_round(*x),
            _ => Value::Null,
        },
        Operator::IntegerToFloat => match first.as_i64() {
            Some(i) => Value::float(i as f64),
            None => Value::Null,
        },
        Operator::Max | Operator::Min => {
            let Some(elements) = flatten(&values) else {
                return Ok(Value::Null);
            };
            let all_integer = elements.iter().all(|e| matches!(e, SingleValue::Integer(_)));
            let Some(xs) = elements
                .iter()
                .map(SingleValue::as_f64)
                .collect::<Option<Vec<f64>>>()
            else {
                return Ok(Value::Null);
            };
            let pick = if operator == Operator::Max {
                xs.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            } else {
                xs.iter().copied().fold(f64::INFINITY, f64::min)
            };
            if xs.is_empty() {
                Value::Null
            } else if all_integer {
                numeric::float_to_integer(pick)
            } else {
                Value::float(pick)
            }
        }

        Operator::Multiple => collect_container(Cardinality::Multiple, &values),
        Operator::Ordered => collect_container(Cardinality::Ordered, &values),
        Operator::ContainerSize => match &first {
            Value::Null => Value::integer(0),
            Value::Multiple { values, .. } | Value::Ordered { values, .. } => {
                Value::integer(values.len() as i64)
            }
            _ => Value::Null,
        },
        Operator::Member => match (&first, &second) {
            (Value::Single(v), Value::Multiple { values, .. } | Value::Ordered { values, .. }) => {
                Value::boolean(values.contains(v))
            }
            _ => Value::Null,
        },
        Operator::Contains => contains(&first, &second)
            .map(Value::boolean)
            .unwrap_or(Value::Null),
        Operator::Delete => match (&first, second) {
            (Value::Single(v), Value::Multiple { base_type, values }) => {
                Value::multiple(base_type, values.into_iter().filter(|e| e != v).collect())
            }
            (Value::Single(v), Value::Ordered { base_type, values }) => {
                Value::ordered(base_type, values.into_iter().filter(|e| e != v).collect())
            }
            _ => Value::Null,
        },
        Operator::Random => match &first {
            Value::Multiple { values, .. } | Value::Ordered { values, .. } => values
                .choose(&mut *ctx.rng)
                .map(|v| Value::Single(v.clone()))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
    })
}

// ──────────────────────────────────────────────
// Item subsets
// ──────────────────────────────────────────────

fn item_subset(subset: &ItemSubset, ctx: &mut EvalContext<'_>) -> Value {
    if !ctx.scope.is_test() {
        ctx.warn(format!(
            "{} is only meaningful in test outcome processing",
            subset.class_name()
        ));
        return Value::Null;
    }
    if subset.kind == SubsetKind::NumberSelected {
        return Value::integer(ctx.scope.selected_item_count() as i64);
    }
    let items = ctx.scope.item_subset(subset);
    match &subset.kind {
        SubsetKind::NumberPresented => count(&items, |i| i.is_presented()),
        SubsetKind::NumberResponded => count(&items, |i| i.is_responded()),
        SubsetKind::NumberCorrect => count(&items, |i| i.is_correct() == Some(true)),
        SubsetKind::NumberIncorrect => count(&items, |i| i.is_incorrect()),
        SubsetKind::NumberSelected => Value::integer(items.len() as i64),
        SubsetKind::OutcomeMaximum {
            outcome_identifier,
            weight_identifier,
        } => outcome_bounds(&items, outcome_identifier, weight_identifier.as_deref(), true),
        SubsetKind::OutcomeMinimum {
            outcome_identifier,
            weight_identifier,
        } => outcome_bounds(&items, outcome_identifier, weight_identifier.as_deref(), false),
        SubsetKind::TestVariables {
            variable_identifier,
            weight_identifier,
            base_type,
        } => test_variables(
            &items,
            variable_identifier,
            weight_identifier.as_deref(),
            *base_type,
        ),
    }
}

fn count(items: &[&dyn ItemView], pred: impl Fn(&dyn ItemView) -> bool) -> Value {
    Value::integer(items.iter().filter(|i| pred(**i)).count() as i64)
}

/// Weighted normalMaximum / normalMinimum of every matched item; NULL if
/// any item does not declare one.
fn outcome_bounds(
    items: &[&dyn ItemView],
    outcome_identifier: &str,
    weight_identifier: Option<&str>,
    maximum: bool,
) -> Value {
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        let bound = item.declaration(outcome_identifier).and_then(|d| {
            if maximum {
                d.normal_maximum()
            } else {
                d.normal_minimum()
            }
        });
        let Some(bound) = bound else {
            return Value::Null;
        };
        let weight = weight_identifier
            .and_then(|w| item.weight(w))
            .unwrap_or(1.0);
        values.push(SingleValue::Float(bound * weight));
    }
    Value::multiple(BaseType::Float, values)
}

/// Single values of a variable across the matched items. Without a base
/// type filter, numeric values are collected and promoted to float when
/// any is a float.
fn test_variables(
    items: &[&dyn ItemView],
    variable_identifier: &str,
    weight_identifier: Option<&str>,
    base_type: Option<BaseType>,
) -> Value {
    let mut values = Vec::new();
    let mut float_found = false;
    for item in items {
        let Some(Value::Single(v)) = item.value(variable_identifier) else {
            continue;
        };
        let wanted = match base_type {
            Some(bt) => v.base_type() == bt,
            None => v.base_type().is_numeric(),
        };
        if !wanted {
            continue;
        }
        let weighted = match (weight_identifier, v.as_f64()) {
            (Some(w), Some(x)) if base_type.map_or(true, |bt| bt == BaseType::Float) => {
                Some(x * item.weight(w).unwrap_or(1.0))
            }
            _ => None,
        };
        match weighted {
            Some(x) => {
                float_found = true;
                values.push(SingleValue::Float(x));
            }
            None => {
                float_found |= matches!(v, SingleValue::Float(_));
                values.push(v);
            }
        }
    }
    let result_type = match base_type {
        Some(bt) => bt,
        None if float_found => BaseType::Float,
        None => BaseType::Integer,
    };
    if base_type.is_none() && float_found {
        values = values
            .into_iter()
            .map(|v| match v {
                SingleValue::Integer(i) => SingleValue::Float(i as f64),
                other => other,
            })
            .collect();
    }
    Value::multiple(result_type, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_scope::MapScope;
    use crate::context::RuntimeNotifications;
    use crate::types::expression::parse_expression;
    use crate::types::VariableKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn eval_in(scope: &mut MapScope, expr: serde_json::Value) -> (Value, RuntimeNotifications) {
        let expr = parse_expression(&expr).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let mut notes = RuntimeNotifications::new();
        let v = {
            let mut ctx = EvalContext::new(scope, &mut rng, &mut notes);
            evaluate(&expr, &mut ctx).unwrap()
        };
        (v, notes)
    }

    fn eval(expr: serde_json::Value) -> Value {
        eval_in(&mut MapScope::default(), expr).0
    }

    fn int(i: i64) -> serde_json::Value {
        json!({"expr": "baseValue", "baseType": "integer", "value": i})
    }

    fn float(x: f64) -> serde_json::Value {
        json!({"expr": "baseValue", "baseType": "float", "value": x})
    }

    fn boolean(b: bool) -> serde_json::Value {
        json!({"expr": "baseValue", "baseType": "boolean", "value": b})
    }

    fn null() -> serde_json::Value {
        json!({"expr": "null"})
    }

    fn op(name: &str, args: Vec<serde_json::Value>) -> serde_json::Value {
        json!({"expr": name, "args": args})
    }

    fn as_f64(v: &Value) -> f64 {
        v.as_f64().unwrap()
    }

    #[test]
    fn math_operators() {
        let sin = json!({"expr": "mathOperator", "name": "sin", "args": [float(0.0)]});
        assert_eq!(eval(sin), Value::float(0.0));
        let atan2 =
            json!({"expr": "mathOperator", "name": "atan2", "args": [float(1.0), float(1.0)]});
        assert!((as_f64(&eval(atan2)) - 0.7853981634).abs() < 1e-9);
        let floor = json!({"expr": "mathOperator", "name": "floor", "args": [float(2.7)]});
        assert_eq!(eval(floor), Value::integer(2));
        let log = json!({"expr": "mathOperator", "name": "log", "args": [int(100)]});
        assert_eq!(eval(log), Value::float(2.0));
    }

    #[test]
    fn math_operator_null_and_non_numeric_give_null() {
        let e = json!({"expr": "mathOperator", "name": "atan2", "args": [float(1.0), (null())]});
        assert_eq!(eval(e), Value::Null);
        let e = json!({"expr": "mathOperator", "name": "sin", "args": [boolean(true)]});
        assert_eq!(eval(e), Value::Null);
        let e = json!({"expr": "mathOperator", "name": "ln", "args": [float(0.0)]});
        assert_eq!(eval(e), Value::Null);
    }

    #[test]
    fn stats_operators() {
        let list = |xs: Vec<serde_json::Value>| op("multiple", xs);
        let stats = |name: &str, arg: serde_json::Value| {
            eval(json!({"expr": "statsOperator", "name": name, "args": [arg]}))
        };
        assert_eq!(stats("mean", list(vec![int(1), int(2), int(3)])), Value::float(2.0));
        assert!(
            (as_f64(&stats("populationVariance", list(vec![int(1), int(2), int(3)])))
                - 0.666_666_7)
                .abs()
                < 1e-6
        );
        assert_eq!(
            stats("sampleVariance", list(vec![int(1), int(2), int(3)])),
            Value::float(1.0)
        );
        assert_eq!(stats("sampleVariance", list(vec![int(5)])), Value::Null);
        assert_eq!(stats("mean", list(vec![])), Value::Null);
        assert_eq!(stats("mean", int(3)), Value::Null);
    }

    #[test]
    fn three_valued_logic() {
        assert_eq!(eval(op("and", vec![boolean(true), null()])), Value::Null);
        assert_eq!(
            eval(op("and", vec![boolean(false), null()])),
            Value::boolean(false)
        );
        assert_eq!(eval(op("or", vec![boolean(true), null()])), Value::boolean(true));
        assert_eq!(eval(op("not", vec![null()])), Value::Null);
        assert_eq!(eval(op("isNull", vec![op("multiple", vec![])])), Value::boolean(true));
    }

    #[test]
    fn any_n_bounds() {
        let any = |min: i64, max: i64, args: Vec<serde_json::Value>| {
            eval(json!({"expr": "anyN", "min": min, "max": max, "args": args}))
        };
        assert_eq!(
            any(1, 2, vec![boolean(true), boolean(false), boolean(false)]),
            Value::boolean(true)
        );
        assert_eq!(any(2, 3, vec![boolean(true), null()]), Value::Null);
        assert_eq!(any(2, 3, vec![boolean(false), null()]), Value::boolean(false));
        assert_eq!(any(3, 1, vec![boolean(true)]), Value::boolean(false));
    }

    #[test]
    fn integer_arithmetic_and_overflow() {
        assert_eq!(eval(op("sum", vec![int(2), int(3)])), Value::integer(5));
        assert_eq!(eval(op("sum", vec![int(2), float(0.5)])), Value::float(2.5));
        assert_eq!(eval(op("sum", vec![int(i64::MAX), int(1)])), Value::Null);
        assert_eq!(eval(op("product", vec![int(4), int(5)])), Value::integer(20));
        assert_eq!(eval(op("subtract", vec![int(4), int(5)])), Value::integer(-1));
        assert_eq!(eval(op("divide", vec![int(1), int(0)])), Value::Null);
        assert_eq!(eval(op("divide", vec![int(1), int(4)])), Value::float(0.25));
        assert_eq!(eval(op("sum", vec![int(1), null()])), Value::Null);
    }

    #[test]
    fn integer_divide_rounds_down() {
        let div = |a: i64, b: i64| eval(op("integerDivide", vec![int(a), int(b)]));
        assert_eq!(div(4, 3), Value::integer(1));
        assert_eq!(div(-1, 3), Value::integer(-1));
        assert_eq!(div(-1, -3), Value::integer(0));
        assert_eq!(div(-4, 3), Value::integer(-2));
        assert_eq!(div(10, -5), Value::integer(-2));
        assert_eq!(div(1, 0), Value::Null);
        assert_eq!(div(i64::MIN, -1), Value::Null);
        let modulus = |a: i64, b: i64| eval(op("integerModulus", vec![int(a), int(b)]));
        assert_eq!(modulus(7, 3), Value::integer(1));
        assert_eq!(modulus(-1, 3), Value::integer(2));
    }

    #[test]
    fn rounding_operators() {
        assert_eq!(eval(op("round", vec![float(2.5)])), Value::integer(3));
        assert_eq!(eval(op("round", vec![float(-2.5)])), Value::integer(-2));
        assert_eq!(eval(op("truncate", vec![float(-2.7)])), Value::integer(-2));
        let round_to = json!({"expr": "roundTo", "roundingMode": "decimalPlaces", "figures": 2,
            "args": [float(3.14159)]});
        assert_eq!(eval(round_to), Value::float(3.14));
        let eq = json!({"expr": "equalRounded", "roundingMode": "significantFigures",
            "figures": 3, "args": [float(3.175), float(3.18)]});
        assert_eq!(eval(eq), Value::boolean(true));
    }

    #[test]
    fn equal_with_tolerance() {
        let e = json!({"expr": "equal", "toleranceMode": "absolute", "tolerance": [0.1],
            "args": [float(1.0), float(1.05)]});
        assert_eq!(eval(e), Value::boolean(true));
        let e = json!({"expr": "equal", "args": [float(1.0), float(1.05)]});
        assert_eq!(eval(e), Value::boolean(false));
        let e = json!({"expr": "equal", "args": [float(1.0), (null())]});
        assert_eq!(eval(e), Value::Null);
    }

    #[test]
    fn match_and_containers() {
        let ident = |s: &str| json!({"expr": "baseValue", "baseType": "identifier", "value": s});
        let set = op("multiple", vec![ident("A"), ident("B"), ident("A")]);
        let same = op("multiple", vec![ident("B"), ident("A"), ident("A")]);
        assert_eq!(eval(op("match", vec![set.clone(), same])), Value::boolean(true));
        assert_eq!(eval(op("match", vec![set.clone(), null()])), Value::Null);
        assert_eq!(eval(op("containerSize", vec![set.clone()])), Value::integer(3));
        assert_eq!(eval(op("containerSize", vec![null()])), Value::integer(0));
        assert_eq!(
            eval(op("member", vec![ident("B"), set.clone()])),
            Value::boolean(true)
        );
        assert_eq!(
            eval(op("contains", vec![set.clone(), op("multiple", vec![ident("A"), ident("A")])])),
            Value::boolean(true)
        );
        assert_eq!(
            eval(op("delete", vec![ident("A"), set])),
            Value::multiple(BaseType::Identifier, vec![SingleValue::Identifier("B".into())])
        );
        let seq = op("ordered", vec![int(1), int(2), int(3)]);
        assert_eq!(
            eval(op("contains", vec![seq.clone(), op("ordered", vec![int(2), int(3)])])),
            Value::boolean(true)
        );
        assert_eq!(
            eval(op("contains", vec![seq.clone(), op("ordered", vec![int(1), int(3)])])),
            Value::boolean(false)
        );
        assert_eq!(
            eval(json!({"expr": "index", "n": 2, "args": [seq.clone()]})),
            Value::integer(2)
        );
        assert_eq!(eval(json!({"expr": "index", "n": 4, "args": [seq]})), Value::Null);
        assert_eq!(
            eval(op("multiple", vec![int(1), boolean(true)])),
            Value::Null
        );
    }

    #[test]
    fn max_min_promote_to_float() {
        assert_eq!(
            eval(op("max", vec![int(1), op("multiple", vec![int(4), int(2)])])),
            Value::integer(4)
        );
        assert_eq!(eval(op("min", vec![int(1), float(0.5)])), Value::float(0.5));
        assert_eq!(eval(op("max", vec![int(1), null()])), Value::Null);
    }

    #[test]
    fn string_and_pattern_matching() {
        let s = |v: &str| json!({"expr": "baseValue", "baseType": "string", "value": v});
        let e = json!({"expr": "stringMatch", "caseSensitive": false,
            "args": [s("Hello"), s("hello")]});
        assert_eq!(eval(e), Value::boolean(true));
        let e = json!({"expr": "stringMatch", "substring": true,
            "args": [s("ell"), s("Hello")]});
        assert_eq!(eval(e), Value::boolean(true));
        let e = json!({"expr": "patternMatch", "pattern": "[0-9]+", "args": [s("123")]});
        assert_eq!(eval(e), Value::boolean(true));
        let e = json!({"expr": "patternMatch", "pattern": "[0-9]+", "args": [s("a123")]});
        assert_eq!(eval(e), Value::boolean(false));
    }

    #[test]
    fn inside_shape() {
        let p = json!({"expr": "baseValue", "baseType": "point", "value": "5 5"});
        let e = json!({"expr": "inside", "shape": "rect", "coords": [0, 0, 10, 10], "args": [p]});
        assert_eq!(eval(e), Value::boolean(true));
        let e = json!({"expr": "inside", "shape": "rect", "coords": [0, 0, 10, 10],
            "args": [(null())]});
        assert_eq!(eval(e), Value::Null);
    }

    #[test]
    fn random_integer_respects_step() {
        for _ in 0..5 {
            let v = eval(json!({"expr": "randomInteger", "min": 2, "max": 10, "step": 4}));
            let i = v.as_i64().unwrap();
            assert!([2, 6, 10].contains(&i), "{}", i);
        }
        assert_eq!(
            eval(json!({"expr": "randomInteger", "min": 5, "max": 1})),
            Value::Null
        );
    }

    #[test]
    fn variables_and_mappings() {
        let mut scope = MapScope::default()
            .declare(
                VariableKind::Response,
                json!({"identifier": "RESPONSE", "cardinality": "single",
                    "baseType": "identifier", "correctResponse": "B",
                    "mapping": {"defaultValue": 0, "mapEntries": [
                        {"mapKey": "B", "mappedValue": 2}
                    ]}}),
            )
            .with("RESPONSE", Value::identifier("B"));
        let (v, _) = eval_in(&mut scope, json!({"expr": "mapResponse", "identifier": "RESPONSE"}));
        assert_eq!(v, Value::float(2.0));
        let (v, _) = eval_in(&mut scope, json!({"expr": "correct", "identifier": "RESPONSE"}));
        assert_eq!(v, Value::identifier("B"));
        let (v, notes) = eval_in(&mut scope, json!({"expr": "variable", "identifier": "NOPE"}));
        assert_eq!(v, Value::Null);
        assert_eq!(notes.warnings().count(), 1);
    }

    #[test]
    fn dotted_reference_forms() {
        assert_eq!(split_dotted("q1.SCORE"), Some(("q1", None, "SCORE")));
        assert_eq!(split_dotted("q1.2.SCORE"), Some(("q1", Some(2), "SCORE")));
        assert_eq!(split_dotted("SCORE"), None);
    }

    #[test]
    fn item_subset_outside_test_warns() {
        let (v, notes) = eval_in(
            &mut MapScope::default(),
            json!({"expr": "numberCorrect"}),
        );
        assert_eq!(v, Value::Null);
        assert_eq!(notes.warnings().count(), 1);
    }

    struct FixedCas;

    impl crate::cas::EvaluationService for FixedCas {
        fn evaluate_math(&self, name: &str, _args: &[Value]) -> Result<Value, CasError> {
            Err(CasError::Evaluation {
                name: name.to_string(),
                message: "no kernel".to_string(),
            })
        }

        fn math_constant(&self, _name: &str) -> Result<Value, CasError> {
            Ok(Value::float(3.0))
        }
    }

    #[test]
    fn cas_delegation_and_policy() {
        let mut scope = MapScope::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut notes = RuntimeNotifications::new();
        let cas = FixedCas;
        let pi = parse_expression(&json!({"expr": "mathConstant", "name": "pi"})).unwrap();
        let sin = parse_expression(
            &json!({"expr": "mathOperator", "name": "sin", "args": [float(1.0)]}),
        )
        .unwrap();
        {
            let mut ctx = EvalContext::new(&mut scope, &mut rng, &mut notes)
                .with_cas(Some(&cas), CasFailurePolicy::NullWithWarning);
            assert_eq!(evaluate(&pi, &mut ctx).unwrap(), Value::float(3.0));
            assert_eq!(evaluate(&sin, &mut ctx).unwrap(), Value::Null);
        }
        assert_eq!(notes.warnings().count(), 1);
        let mut ctx = EvalContext::new(&mut scope, &mut rng, &mut notes)
            .with_cas(Some(&cas), CasFailurePolicy::Fatal);
        assert!(matches!(evaluate(&sin, &mut ctx), Err(EvalError::Cas(_))));
    }
}
