//! Numeric model: the math operator table, statistics, QTI rounding and
//! tolerance comparison.
//!
//! Plain float math uses `f64`; rounding to decimal places or significant
//! figures goes through `rust_decimal` so that HALF_UP applies to the
//! decimal form of the number rather than its binary approximation.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::types::{MathOperator, RoundingMode, StatsOperator, ToleranceMode, Value};

// ──────────────────────────────────────────────
// Math operator table
// ──────────────────────────────────────────────

/// A native numeric function.
#[derive(Clone, Copy)]
pub enum MathFunction {
    Unary(fn(f64) -> f64),
    Binary(fn(f64, f64) -> f64),
}

impl std::fmt::Debug for MathFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MathFunction::Unary(_) => f.write_str("Unary"),
            MathFunction::Binary(_) => f.write_str("Binary"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MathOperatorSpec {
    pub name: &'static str,
    pub operator: MathOperator,
    pub arity: usize,
    pub function: MathFunction,
    /// `floor`, `ceil` and `signum` produce integers.
    pub integer_result: bool,
}

const fn unary(name: &'static str, operator: MathOperator, f: fn(f64) -> f64) -> MathOperatorSpec {
    MathOperatorSpec {
        name,
        operator,
        arity: 1,
        function: MathFunction::Unary(f),
        integer_result: false,
    }
}

const fn integral(
    name: &'static str,
    operator: MathOperator,
    f: fn(f64) -> f64,
) -> MathOperatorSpec {
    MathOperatorSpec {
        name,
        operator,
        arity: 1,
        function: MathFunction::Unary(f),
        integer_result: true,
    }
}

fn signum(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn sec(x: f64) -> f64 {
    1.0 / x.cos()
}

fn csc(x: f64) -> f64 {
    1.0 / x.sin()
}

fn cot(x: f64) -> f64 {
    1.0 / x.tan()
}

fn asec(x: f64) -> f64 {
    (1.0 / x).acos()
}

fn acsc(x: f64) -> f64 {
    (1.0 / x).asin()
}

fn acot(x: f64) -> f64 {
    (1.0 / x).atan()
}

fn sech(x: f64) -> f64 {
    1.0 / x.cosh()
}

fn csch(x: f64) -> f64 {
    1.0 / x.sinh()
}

fn coth(x: f64) -> f64 {
    1.0 / x.tanh()
}

pub const MATH_OPERATORS: &[MathOperatorSpec] = &[
    unary("sin", MathOperator::Sin, f64::sin),
    unary("cos", MathOperator::Cos, f64::cos),
    unary("tan", MathOperator::Tan, f64::tan),
    unary("sec", MathOperator::Sec, sec),
    unary("csc", MathOperator::Csc, csc),
    unary("cot", MathOperator::Cot, cot),
    unary("asin", MathOperator::Asin, f64::asin),
    unary("acos", MathOperator::Acos, f64::acos),
    unary("atan", MathOperator::Atan, f64::atan),
    MathOperatorSpec {
        name: "atan2",
        operator: MathOperator::Atan2,
        arity: 2,
        function: MathFunction::Binary(f64::atan2),
        integer_result: false,
    },
    unary("asec", MathOperator::Asec, asec),
    unary("acsc", MathOperator::Acsc, acsc),
    unary("acot", MathOperator::Acot, acot),
    unary("sinh", MathOperator::Sinh, f64::sinh),
    unary("cosh", MathOperator::Cosh, f64::cosh),
    unary("tanh", MathOperator::Tanh, f64::tanh),
    unary("sech", MathOperator::Sech, sech),
    unary("csch", MathOperator::Csch, csch),
    unary("coth", MathOperator::Coth, coth),
    unary("log", MathOperator::Log, f64::log10),
    unary("ln", MathOperator::Ln, f64::ln),
    unary("exp", MathOperator::Exp, f64::exp),
    unary("abs", MathOperator::Abs, f64::abs),
    integral("signum", MathOperator::Signum, signum),
    integral("floor", MathOperator::Floor, f64::floor),
    integral("ceil", MathOperator::Ceil, f64::ceil),
    unary("toDegrees", MathOperator::ToDegrees, f64::to_degrees),
    unary("toRadians", MathOperator::ToRadians, f64::to_radians),
];

pub fn math_operator_spec(operator: MathOperator) -> Option<&'static MathOperatorSpec> {
    MATH_OPERATORS.iter().find(|s| s.operator == operator)
}

/// Apply a table entry to already-checked numeric arguments.
///
/// Non-finite results are NULL, as are integral results outside `i64`.
pub fn apply_math(spec: &MathOperatorSpec, args: &[f64]) -> Value {
    let result = match (spec.function, args) {
        (MathFunction::Unary(f), [x]) => f(*x),
        (MathFunction::Binary(f), [x, y]) => f(*x, *y),
        _ => return Value::Null,
    };
    if !result.is_finite() {
        return Value::Null;
    }
    if spec.integer_result {
        float_to_integer(result)
    } else {
        Value::float(result)
    }
}

/// Integral float to integer value; NULL when out of range.
pub fn float_to_integer(x: f64) -> Value {
    if x.is_finite() && x >= i64::MIN as f64 && x <= i64::MAX as f64 {
        Value::integer(x as i64)
    } else {
        Value::Null
    }
}

// ──────────────────────────────────────────────
// Statistics
// ──────────────────────────────────────────────

/// Evaluate a statistics operator over the container's numeric elements.
pub fn stats(operator: StatsOperator, xs: &[f64]) -> Value {
    let n = xs.len();
    if n == 0 {
        return Value::Null;
    }
    let mean = xs.iter().sum::<f64>() / n as f64;
    let squares = || xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>();
    match operator {
        StatsOperator::Mean => Value::float(mean),
        StatsOperator::PopVariance => Value::float(squares() / n as f64),
        StatsOperator::PopSD => Value::float((squares() / n as f64).sqrt()),
        StatsOperator::SampleVariance if n >= 2 => Value::float(squares() / (n - 1) as f64),
        StatsOperator::SampleSD if n >= 2 => Value::float((squares() / (n - 1) as f64).sqrt()),
        StatsOperator::SampleVariance | StatsOperator::SampleSD => Value::Null,
    }
}

// ──────────────────────────────────────────────
// Rounding
// ──────────────────────────────────────────────

/// Whether `figures` is legal for the rounding mode.
pub fn figures_valid(mode: RoundingMode, figures: i64) -> bool {
    match mode {
        RoundingMode::SignificantFigures => figures >= 1,
        RoundingMode::DecimalPlaces => figures >= 0,
    }
}

fn pow10(k: u32) -> Option<Decimal> {
    let mut p = Decimal::ONE;
    for _ in 0..k {
        p = p.checked_mul(Decimal::TEN)?;
    }
    Some(p)
}

/// Round half-up on the decimal representation of `x`.
///
/// `None` when `figures` is illegal for the mode or the number does not fit
/// the decimal model.
pub fn round_decimal(x: f64, mode: RoundingMode, figures: i64) -> Option<Decimal> {
    if !x.is_finite() || !figures_valid(mode, figures) {
        return None;
    }
    let d = Decimal::from_str(&x.to_string()).ok()?;
    let strategy = RoundingStrategy::MidpointAwayFromZero;
    match mode {
        RoundingMode::DecimalPlaces => {
            Some(d.round_dp_with_strategy(u32::try_from(figures).ok()?, strategy))
        }
        RoundingMode::SignificantFigures => {
            if d.is_zero() {
                return Some(Decimal::ZERO);
            }
            // Digits before the decimal point, or minus the leading zeros
            // after it: 123.4 -> 3, 0.0123 -> -1.
            let abs = d.abs();
            let shift: i64 = if abs >= Decimal::ONE {
                abs.trunc().to_string().len() as i64
            } else {
                let mut shift = 0;
                let mut probe = abs;
                loop {
                    probe = probe.checked_mul(Decimal::TEN)?;
                    if probe >= Decimal::ONE {
                        break shift;
                    }
                    shift -= 1;
                }
            };
            let places = figures - shift;
            if places >= 0 {
                Some(d.round_dp_with_strategy(u32::try_from(places).ok()?, strategy))
            } else {
                let scale = pow10(u32::try_from(-places).ok()?)?;
                let scaled = d.checked_div(scale)?.round_dp_with_strategy(0, strategy);
                scaled.checked_mul(scale)
            }
        }
    }
}

/// Round through the float's own formatting, for magnitudes the decimal
/// model cannot hold. Formatting rounds the exact binary value, which
/// never sits on a tie at those magnitudes.
fn round_float(x: f64, mode: RoundingMode, figures: i64) -> Option<f64> {
    if !x.is_finite() || !figures_valid(mode, figures) {
        return None;
    }
    let text = match mode {
        RoundingMode::DecimalPlaces => format!("{:.*}", usize::try_from(figures).ok()?, x),
        RoundingMode::SignificantFigures => {
            format!("{:.*e}", usize::try_from(figures - 1).ok()?, x)
        }
    };
    text.parse().ok()
}

/// Rounded float, falling back to float rounding outside the decimal range.
fn round_f64(x: f64, mode: RoundingMode, figures: i64) -> Option<f64> {
    match round_decimal(x, mode, figures) {
        Some(d) => d.to_f64(),
        None => round_float(x, mode, figures),
    }
}

/// `roundTo`: the rounded value as a float, NULL when rounding is impossible.
pub fn round_to(x: f64, mode: RoundingMode, figures: i64) -> Value {
    round_f64(x, mode, figures)
        .map(Value::float)
        .unwrap_or(Value::Null)
}

/// `equalRounded`: both numbers rounded, then compared. `None` means NULL.
pub fn equal_rounded(x: f64, y: f64, mode: RoundingMode, figures: i64) -> Option<bool> {
    match (round_decimal(x, mode, figures), round_decimal(y, mode, figures)) {
        (Some(a), Some(b)) => Some(a == b),
        _ => Some(round_f64(x, mode, figures)? == round_f64(y, mode, figures)?),
    }
}

/// QTI `round`: half rounds towards positive infinity.
pub fn qti_round(x: f64) -> Value {
    float_to_integer((x + 0.5).floor())
}

// ──────────────────────────────────────────────
// Tolerance comparison
// ──────────────────────────────────────────────

/// `equal` with tolerance: `y` must lie in the range built around `x`.
///
/// `tolerances` holds t0 and optionally t1 (t1 defaults to t0); relative
/// tolerances are percentages.
pub fn equal_with_tolerance(
    x: f64,
    y: f64,
    mode: ToleranceMode,
    tolerances: &[f64],
    include_lower_bound: bool,
    include_upper_bound: bool,
) -> bool {
    let t0 = tolerances.first().copied().unwrap_or(0.0);
    let t1 = tolerances.get(1).copied().unwrap_or(t0);
    let (lower, upper) = match mode {
        ToleranceMode::Exact => return x == y,
        ToleranceMode::Absolute => (x - t0, x + t1),
        ToleranceMode::Relative => {
            let (a, b) = (x * (1.0 - t0 / 100.0), x * (1.0 + t1 / 100.0));
            // Negative x flips the bounds.
            (a.min(b), a.max(b))
        }
    };
    let above = if include_lower_bound {
        y >= lower
    } else {
        y > lower
    };
    let below = if include_upper_bound {
        y <= upper
    } else {
        y < upper
    };
    above && below
}

/// Anchor a pattern so that it must match the whole input.
pub fn anchored_pattern(pattern: &str) -> String {
    format!("^(?:{})$", pattern)
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
