//! Expression tree: a single tagged enum with typed attributes per node kind.
//!
//! Expressions are built once from package JSON (`{"expr": "<name>", ...}`)
//! and never mutated afterwards. Unknown expression, operator or constant
//! names fail here, at construction time.

use super::tables::{parse_coords, Shape};
use super::values::{BaseType, Cardinality, Value};
use super::{get_str, obj_list, opt_bool, opt_i64, opt_str, str_list, EvalError};
use crate::numeric;

// ──────────────────────────────────────────────
// Enumerated attributes
// ──────────────────────────────────────────────

/// Named constants of `mathConstant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathConstant {
    Pi,
    E,
}

impl MathConstant {
    pub fn parse(name: &str) -> Result<MathConstant, EvalError> {
        match name {
            "pi" => Ok(MathConstant::Pi),
            "e" => Ok(MathConstant::E),
            other => Err(EvalError::unknown("mathConstant", other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MathConstant::Pi => "pi",
            MathConstant::E => "e",
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            MathConstant::Pi => std::f64::consts::PI,
            MathConstant::E => std::f64::consts::E,
        }
    }
}

/// Operators of `mathOperator`. Arity and function live in
/// [`numeric::MATH_OPERATORS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOperator {
    Sin,
    Cos,
    Tan,
    Sec,
    Csc,
    Cot,
    Asin,
    Acos,
    Atan,
    Atan2,
    Asec,
    Acsc,
    Acot,
    Sinh,
    Cosh,
    Tanh,
    Sech,
    Csch,
    Coth,
    Log,
    Ln,
    Exp,
    Abs,
    Signum,
    Floor,
    Ceil,
    ToDegrees,
    ToRadians,
}

impl MathOperator {
    pub fn parse(name: &str) -> Result<MathOperator, EvalError> {
        numeric::MATH_OPERATORS
            .iter()
            .find(|spec| spec.name == name)
            .map(|spec| spec.operator)
            .ok_or_else(|| EvalError::unknown("mathOperator", name))
    }

    pub fn name(&self) -> &'static str {
        numeric::math_operator_spec(*self)
            .map(|spec| spec.name)
            .unwrap_or("?")
    }
}

/// Operators of `statsOperator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsOperator {
    Mean,
    SampleVariance,
    SampleSD,
    PopVariance,
    PopSD,
}

impl StatsOperator {
    pub fn parse(name: &str) -> Result<StatsOperator, EvalError> {
        Ok(match name {
            "mean" => StatsOperator::Mean,
            "sampleVariance" => StatsOperator::SampleVariance,
            "sampleSD" => StatsOperator::SampleSD,
            "popVariance" | "populationVariance" => StatsOperator::PopVariance,
            "popSD" | "populationSD" => StatsOperator::PopSD,
            other => return Err(EvalError::unknown("statsOperator", other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToleranceMode {
    Exact,
    Absolute,
    Relative,
}

impl ToleranceMode {
    pub fn parse(name: &str) -> Result<ToleranceMode, EvalError> {
        Ok(match name {
            "exact" => ToleranceMode::Exact,
            "absolute" => ToleranceMode::Absolute,
            "relative" => ToleranceMode::Relative,
            other => return Err(EvalError::unknown("toleranceMode", other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingMode {
    SignificantFigures,
    DecimalPlaces,
}

impl RoundingMode {
    pub fn parse(name: &str) -> Result<RoundingMode, EvalError> {
        Ok(match name {
            "significantFigures" => RoundingMode::SignificantFigures,
            "decimalPlaces" => RoundingMode::DecimalPlaces,
            other => return Err(EvalError::unknown("roundingMode", other)),
        })
    }
}

/// Operators whose only attributes are their children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
    Not,
    IsNull,
    Match,
    Lt,
    Lte,
    Gt,
    Gte,
    DurationLt,
    DurationGte,
    Sum,
    Product,
    Subtract,
    Divide,
    Power,
    IntegerDivide,
    IntegerModulus,
    Truncate,
    Round,
    IntegerToFloat,
    Max,
    Min,
    Multiple,
    Ordered,
    ContainerSize,
    Member,
    Contains,
    Delete,
    Random,
}

const OPERATORS: &[(&str, Operator)] = &[
    ("and", Operator::And),
    ("or", Operator::Or),
    ("not", Operator::Not),
    ("isNull", Operator::IsNull),
    ("match", Operator::Match),
    ("lt", Operator::Lt),
    ("lte", Operator::Lte),
    ("gt", Operator::Gt),
    ("gte", Operator::Gte),
    ("durationLT", Operator::DurationLt),
    ("durationGTE", Operator::DurationGte),
    ("sum", Operator::Sum),
    ("product", Operator::Product),
    ("subtract", Operator::Subtract),
    ("divide", Operator::Divide),
    ("power", Operator::Power),
    ("integerDivide", Operator::IntegerDivide),
    ("integerModulus", Operator::IntegerModulus),
    ("truncate", Operator::Truncate),
    ("round", Operator::Round),
    ("integerToFloat", Operator::IntegerToFloat),
    ("max", Operator::Max),
    ("min", Operator::Min),
    ("multiple", Operator::Multiple),
    ("ordered", Operator::Ordered),
    ("containerSize", Operator::ContainerSize),
    ("member", Operator::Member),
    ("contains", Operator::Contains),
    ("delete", Operator::Delete),
    ("random", Operator::Random),
];

impl Operator {
    pub fn from_name(name: &str) -> Option<Operator> {
        OPERATORS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, op)| *op)
    }

    pub fn name(&self) -> &'static str {
        OPERATORS
            .iter()
            .find(|(_, op)| op == self)
            .map(|(n, _)| *n)
            .unwrap_or("?")
    }

    /// Allowed child count as (min, max); `None` max is unbounded.
    pub fn arity(&self) -> (usize, Option<usize>) {
        use Operator::*;
        match self {
            Not | IsNull | Truncate | Round | IntegerToFloat | ContainerSize | Random => {
                (1, Some(1))
            }
            Match | Lt | Lte | Gt | Gte | DurationLt | DurationGte | Subtract | Divide | Power
            | IntegerDivide | IntegerModulus | Member | Contains | Delete => (2, Some(2)),
            And | Or | Sum | Product | Max | Min => (1, None),
            Multiple | Ordered => (0, None),
        }
    }
}

// ──────────────────────────────────────────────
// Item subsets
// ──────────────────────────────────────────────

/// What an item-subset expression computes over its matched items.
#[derive(Debug, Clone, PartialEq)]
pub enum SubsetKind {
    NumberCorrect,
    NumberIncorrect,
    NumberPresented,
    NumberResponded,
    NumberSelected,
    OutcomeMinimum {
        outcome_identifier: String,
        weight_identifier: Option<String>,
    },
    OutcomeMaximum {
        outcome_identifier: String,
        weight_identifier: Option<String>,
    },
    TestVariables {
        variable_identifier: String,
        weight_identifier: Option<String>,
        base_type: Option<BaseType>,
    },
}

/// Item-subset expression: a kind plus the section/category filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSubset {
    pub kind: SubsetKind,
    pub section_identifier: Option<String>,
    pub include_categories: Vec<String>,
    pub exclude_categories: Vec<String>,
}

impl ItemSubset {
    pub fn class_name(&self) -> &'static str {
        match self.kind {
            SubsetKind::NumberCorrect => "numberCorrect",
            SubsetKind::NumberIncorrect => "numberIncorrect",
            SubsetKind::NumberPresented => "numberPresented",
            SubsetKind::NumberResponded => "numberResponded",
            SubsetKind::NumberSelected => "numberSelected",
            SubsetKind::OutcomeMinimum { .. } => "outcomeMinimum",
            SubsetKind::OutcomeMaximum { .. } => "outcomeMaximum",
            SubsetKind::TestVariables { .. } => "testVariables",
        }
    }
}

// ──────────────────────────────────────────────
// Expressions
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    BaseValue(Value),
    /// `identifier` may be dotted (`itemRef.VAR`) inside tests.
    Variable {
        identifier: String,
        weight_identifier: Option<String>,
    },
    Default(String),
    Correct(String),
    Null,
    MapResponse(String),
    MapResponsePoint(String),
    RandomInteger {
        min: i64,
        max: i64,
        step: i64,
    },
    RandomFloat {
        min: f64,
        max: f64,
    },
    MathConstant(MathConstant),
    MathOperator {
        operator: MathOperator,
        args: Vec<Expression>,
    },
    StatsOperator {
        operator: StatsOperator,
        args: Vec<Expression>,
    },
    Equal {
        tolerance_mode: ToleranceMode,
        tolerances: Vec<f64>,
        include_lower_bound: bool,
        include_upper_bound: bool,
        args: Vec<Expression>,
    },
    EqualRounded {
        rounding_mode: RoundingMode,
        figures: i64,
        args: Vec<Expression>,
    },
    RoundTo {
        rounding_mode: RoundingMode,
        figures: i64,
        args: Vec<Expression>,
    },
    AnyN {
        min: i64,
        max: i64,
        args: Vec<Expression>,
    },
    Inside {
        shape: Shape,
        coords: Vec<i64>,
        args: Vec<Expression>,
    },
    StringMatch {
        case_sensitive: bool,
        substring: bool,
        args: Vec<Expression>,
    },
    /// Pattern is anchored at both ends when evaluated.
    PatternMatch {
        pattern: String,
        args: Vec<Expression>,
    },
    Index {
        n: i64,
        args: Vec<Expression>,
    },
    FieldValue {
        field_identifier: String,
        args: Vec<Expression>,
    },
    ItemSubset(ItemSubset),
    Operator {
        operator: Operator,
        args: Vec<Expression>,
    },
}

impl Expression {
    /// QTI class name of this node.
    pub fn class_name(&self) -> &'static str {
        match self {
            Expression::BaseValue(_) => "baseValue",
            Expression::Variable { .. } => "variable",
            Expression::Default(_) => "default",
            Expression::Correct(_) => "correct",
            Expression::Null => "null",
            Expression::MapResponse(_) => "mapResponse",
            Expression::MapResponsePoint(_) => "mapResponsePoint",
            Expression::RandomInteger { .. } => "randomInteger",
            Expression::RandomFloat { .. } => "randomFloat",
            Expression::MathConstant(_) => "mathConstant",
            Expression::MathOperator { .. } => "mathOperator",
            Expression::StatsOperator { .. } => "statsOperator",
            Expression::Equal { .. } => "equal",
            Expression::EqualRounded { .. } => "equalRounded",
            Expression::RoundTo { .. } => "roundTo",
            Expression::AnyN { .. } => "anyN",
            Expression::Inside { .. } => "inside",
            Expression::StringMatch { .. } => "stringMatch",
            Expression::PatternMatch { .. } => "patternMatch",
            Expression::Index { .. } => "index",
            Expression::FieldValue { .. } => "fieldValue",
            Expression::ItemSubset(subset) => subset.class_name(),
            Expression::Operator { operator, .. } => operator.name(),
        }
    }

    /// Child expressions, in evaluation order.
    pub fn args(&self) -> &[Expression] {
        match self {
            Expression::MathOperator { args, .. }
            | Expression::StatsOperator { args, .. }
            | Expression::Equal { args, .. }
            | Expression::EqualRounded { args, .. }
            | Expression::RoundTo { args, .. }
            | Expression::AnyN { args, .. }
            | Expression::Inside { args, .. }
            | Expression::StringMatch { args, .. }
            | Expression::PatternMatch { args, .. }
            | Expression::Index { args, .. }
            | Expression::FieldValue { args, .. }
            | Expression::Operator { args, .. } => args,
            _ => &[],
        }
    }

    /// Allowed child count as (min, max).
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Expression::MathOperator { operator, .. } => {
                let n = numeric::math_operator_spec(*operator)
                    .map(|s| s.arity)
                    .unwrap_or(1);
                (n, Some(n))
            }
            Expression::StatsOperator { .. }
            | Expression::RoundTo { .. }
            | Expression::Inside { .. }
            | Expression::PatternMatch { .. }
            | Expression::Index { .. }
            | Expression::FieldValue { .. } => (1, Some(1)),
            Expression::Equal { .. }
            | Expression::EqualRounded { .. }
            | Expression::StringMatch { .. } => (2, Some(2)),
            Expression::AnyN { .. } => (1, None),
            Expression::Operator { operator, .. } => operator.arity(),
            _ => (0, Some(0)),
        }
    }

    /// Variable identifier referenced directly by this node, if any.
    pub fn referenced_identifier(&self) -> Option<&str> {
        match self {
            Expression::Variable { identifier, .. }
            | Expression::Default(identifier)
            | Expression::Correct(identifier)
            | Expression::MapResponse(identifier)
            | Expression::MapResponsePoint(identifier) => Some(identifier),
            _ => None,
        }
    }

    /// Statically known result cardinality, where one exists.
    pub fn static_cardinality(&self) -> Option<Cardinality> {
        match self {
            Expression::BaseValue(v) => v.cardinality(),
            Expression::MathOperator { .. }
            | Expression::MathConstant(_)
            | Expression::StatsOperator { .. }
            | Expression::Equal { .. }
            | Expression::EqualRounded { .. }
            | Expression::RoundTo { .. }
            | Expression::AnyN { .. }
            | Expression::Inside { .. }
            | Expression::StringMatch { .. }
            | Expression::PatternMatch { .. }
            | Expression::MapResponse(_)
            | Expression::MapResponsePoint(_)
            | Expression::RandomInteger { .. }
            | Expression::RandomFloat { .. } => Some(Cardinality::Single),
            Expression::ItemSubset(subset) => match subset.kind {
                SubsetKind::OutcomeMinimum { .. }
                | SubsetKind::OutcomeMaximum { .. }
                | SubsetKind::TestVariables { .. } => Some(Cardinality::Multiple),
                _ => Some(Cardinality::Single),
            },
            Expression::Operator { operator, .. } => match operator {
                Operator::Multiple => Some(Cardinality::Multiple),
                Operator::Ordered => Some(Cardinality::Ordered),
                Operator::Delete => None,
                _ => Some(Cardinality::Single),
            },
            _ => None,
        }
    }

    /// Statically known result base type, where one exists.
    pub fn static_base_type(&self) -> Option<BaseType> {
        match self {
            Expression::BaseValue(v) => v.base_type(),
            Expression::MathConstant(_)
            | Expression::StatsOperator { .. }
            | Expression::MapResponse(_)
            | Expression::MapResponsePoint(_)
            | Expression::RandomFloat { .. }
            | Expression::ItemSubset(ItemSubset {
                kind: SubsetKind::OutcomeMinimum { .. } | SubsetKind::OutcomeMaximum { .. },
                ..
            }) => Some(BaseType::Float),
            Expression::MathOperator { operator, .. } => numeric::math_operator_spec(*operator)
                .map(|s| {
                    if s.integer_result {
                        BaseType::Integer
                    } else {
                        BaseType::Float
                    }
                }),
            Expression::Equal { .. }
            | Expression::EqualRounded { .. }
            | Expression::AnyN { .. }
            | Expression::Inside { .. }
            | Expression::StringMatch { .. }
            | Expression::PatternMatch { .. } => Some(BaseType::Boolean),
            Expression::RandomInteger { .. } => Some(BaseType::Integer),
            Expression::ItemSubset(ItemSubset {
                kind: SubsetKind::TestVariables { base_type, .. },
                ..
            }) => *base_type,
            Expression::ItemSubset(_) => Some(BaseType::Integer),
            Expression::Operator { operator, .. } => match operator {
                Operator::And
                | Operator::Or
                | Operator::Not
                | Operator::IsNull
                | Operator::Match
                | Operator::Lt
                | Operator::Lte
                | Operator::Gt
                | Operator::Gte
                | Operator::DurationLt
                | Operator::DurationGte
                | Operator::Member
                | Operator::Contains => Some(BaseType::Boolean),
                Operator::Divide | Operator::IntegerToFloat | Operator::Power => {
                    Some(BaseType::Float)
                }
                Operator::IntegerDivide
                | Operator::IntegerModulus
                | Operator::Truncate
                | Operator::Round
                | Operator::ContainerSize => Some(BaseType::Integer),
                _ => None,
            },
            _ => None,
        }
    }
}

// ──────────────────────────────────────────────
// Parsing
// ──────────────────────────────────────────────

fn parse_args(v: &serde_json::Value) -> Result<Vec<Expression>, EvalError> {
    obj_list(v, "args")?.iter().map(parse_expression).collect()
}

fn required_i64(v: &serde_json::Value, field: &str, class: &str) -> Result<i64, EvalError> {
    opt_i64(v, field)
        .ok_or_else(|| EvalError::deserialize(format!("{} missing integer '{}'", class, field)))
}

fn parse_subset(v: &serde_json::Value, class: &str) -> Result<Option<ItemSubset>, EvalError> {
    let weight_identifier = opt_str(v, "weightIdentifier");
    let kind = match class {
        "numberCorrect" => SubsetKind::NumberCorrect,
        "numberIncorrect" => SubsetKind::NumberIncorrect,
        "numberPresented" => SubsetKind::NumberPresented,
        "numberResponded" => SubsetKind::NumberResponded,
        "numberSelected" => SubsetKind::NumberSelected,
        "outcomeMinimum" => SubsetKind::OutcomeMinimum {
            outcome_identifier: get_str(v, "outcomeIdentifier")?,
            weight_identifier,
        },
        "outcomeMaximum" => SubsetKind::OutcomeMaximum {
            outcome_identifier: get_str(v, "outcomeIdentifier")?,
            weight_identifier,
        },
        "testVariables" => SubsetKind::TestVariables {
            variable_identifier: get_str(v, "variableIdentifier")?,
            weight_identifier,
            base_type: opt_str(v, "baseType")
                .map(|b| BaseType::parse(&b))
                .transpose()?,
        },
        _ => return Ok(None),
    };
    Ok(Some(ItemSubset {
        kind,
        section_identifier: opt_str(v, "sectionIdentifier"),
        include_categories: str_list(v, "includeCategory")?,
        exclude_categories: str_list(v, "excludeCategory")?,
    }))
}

/// Build an expression node (and its subtree) from package JSON.
pub fn parse_expression(v: &serde_json::Value) -> Result<Expression, EvalError> {
    let class = v
        .get("expr")
        .and_then(|e| e.as_str())
        .ok_or_else(|| EvalError::deserialize("expression missing 'expr'"))?;

    if let Some(operator) = Operator::from_name(class) {
        return Ok(Expression::Operator {
            operator,
            args: parse_args(v)?,
        });
    }
    if let Some(subset) = parse_subset(v, class)? {
        return Ok(Expression::ItemSubset(subset));
    }

    Ok(match class {
        "baseValue" => {
            let bt = BaseType::parse(&get_str(v, "baseType")?)?;
            let raw = v
                .get("value")
                .ok_or_else(|| EvalError::deserialize("baseValue missing 'value'"))?;
            Expression::BaseValue(Value::from_json(Cardinality::Single, Some(bt), raw)?)
        }
        "variable" => Expression::Variable {
            identifier: get_str(v, "identifier")?,
            weight_identifier: opt_str(v, "weightIdentifier"),
        },
        "default" => Expression::Default(get_str(v, "identifier")?),
        "correct" => Expression::Correct(get_str(v, "identifier")?),
        "null" => Expression::Null,
        "mapResponse" => Expression::MapResponse(get_str(v, "identifier")?),
        "mapResponsePoint" => Expression::MapResponsePoint(get_str(v, "identifier")?),
        "randomInteger" => Expression::RandomInteger {
            min: opt_i64(v, "min").unwrap_or(0),
            max: required_i64(v, "max", class)?,
            step: opt_i64(v, "step").unwrap_or(1),
        },
        "randomFloat" => Expression::RandomFloat {
            min: v.get("min").and_then(|m| m.as_f64()).unwrap_or(0.0),
            max: v
                .get("max")
                .and_then(|m| m.as_f64())
                .ok_or_else(|| EvalError::deserialize("randomFloat missing 'max'"))?,
        },
        "mathConstant" => Expression::MathConstant(MathConstant::parse(&get_str(v, "name")?)?),
        "mathOperator" => Expression::MathOperator {
            operator: MathOperator::parse(&get_str(v, "name")?)?,
            args: parse_args(v)?,
        },
        "statsOperator" => Expression::StatsOperator {
            operator: StatsOperator::parse(&get_str(v, "name")?)?,
            args: parse_args(v)?,
        },
        "equal" => Expression::Equal {
            tolerance_mode: opt_str(v, "toleranceMode")
                .map(|m| ToleranceMode::parse(&m))
                .transpose()?
                .unwrap_or(ToleranceMode::Exact),
            tolerances: match v.get("tolerance") {
                None | Some(serde_json::Value::Null) => Vec::new(),
                Some(serde_json::Value::Array(arr)) => arr
                    .iter()
                    .map(|t| {
                        t.as_f64()
                            .ok_or_else(|| EvalError::deserialize("tolerance must be numeric"))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                Some(t) => vec![t
                    .as_f64()
                    .ok_or_else(|| EvalError::deserialize("tolerance must be numeric"))?],
            },
            include_lower_bound: opt_bool(v, "includeLowerBound", true),
            include_upper_bound: opt_bool(v, "includeUpperBound", true),
            args: parse_args(v)?,
        },
        "equalRounded" | "roundTo" => {
            let rounding_mode = opt_str(v, "roundingMode")
                .map(|m| RoundingMode::parse(&m))
                .transpose()?
                .unwrap_or(RoundingMode::SignificantFigures);
            let figures = required_i64(v, "figures", class)?;
            let args = parse_args(v)?;
            if class == "roundTo" {
                Expression::RoundTo {
                    rounding_mode,
                    figures,
                    args,
                }
            } else {
                Expression::EqualRounded {
                    rounding_mode,
                    figures,
                    args,
                }
            }
        }
        "anyN" => Expression::AnyN {
            min: required_i64(v, "min", class)?,
            max: required_i64(v, "max", class)?,
            args: parse_args(v)?,
        },
        "inside" => Expression::Inside {
            shape: Shape::parse(&get_str(v, "shape")?)?,
            coords: parse_coords(v.get("coords"))?,
            args: parse_args(v)?,
        },
        "stringMatch" => Expression::StringMatch {
            case_sensitive: opt_bool(v, "caseSensitive", true),
            substring: opt_bool(v, "substring", false),
            args: parse_args(v)?,
        },
        "patternMatch" => {
            let pattern = get_str(v, "pattern")?;
            regex::Regex::new(&numeric::anchored_pattern(&pattern)).map_err(|e| {
                EvalError::deserialize(format!("invalid pattern '{}': {}", pattern, e))
            })?;
            Expression::PatternMatch {
                pattern,
                args: parse_args(v)?,
            }
        }
        "index" => Expression::Index {
            n: required_i64(v, "n", class)?,
            args: parse_args(v)?,
        },
        "fieldValue" => Expression::FieldValue {
            field_identifier: get_str(v, "fieldIdentifier")?,
            args: parse_args(v)?,
        },
        other => return Err(EvalError::unknown("expression", other)),
    })
}
