//! Runtime value model: base types, cardinalities and values.
//!
//! A `Value` is either NULL or a container (single, multiple, ordered,
//! record) of base-typed single values. NULL carries no base type. Empty
//! multiple/ordered/record containers are NULL.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::EvalError;

// ──────────────────────────────────────────────
// Base types and cardinality
// ──────────────────────────────────────────────

/// QTI base types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BaseType {
    Identifier,
    Boolean,
    Integer,
    Float,
    String,
    Point,
    Pair,
    DirectedPair,
    Duration,
    File,
    Uri,
    IntOrIdentifier,
}

impl BaseType {
    pub fn parse(name: &str) -> Result<BaseType, EvalError> {
        Ok(match name {
            "identifier" => BaseType::Identifier,
            "boolean" => BaseType::Boolean,
            "integer" => BaseType::Integer,
            "float" => BaseType::Float,
            "string" => BaseType::String,
            "point" => BaseType::Point,
            "pair" => BaseType::Pair,
            "directedPair" => BaseType::DirectedPair,
            "duration" => BaseType::Duration,
            "file" => BaseType::File,
            "uri" => BaseType::Uri,
            "intOrIdentifier" => BaseType::IntOrIdentifier,
            other => return Err(EvalError::unknown("baseType", other)),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            BaseType::Identifier => "identifier",
            BaseType::Boolean => "boolean",
            BaseType::Integer => "integer",
            BaseType::Float => "float",
            BaseType::String => "string",
            BaseType::Point => "point",
            BaseType::Pair => "pair",
            BaseType::DirectedPair => "directedPair",
            BaseType::Duration => "duration",
            BaseType::File => "file",
            BaseType::Uri => "uri",
            BaseType::IntOrIdentifier => "intOrIdentifier",
        }
    }

    /// Integer and float are the only numeric base types.
    pub fn is_numeric(&self) -> bool {
        matches!(self, BaseType::Integer | BaseType::Float)
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// QTI cardinalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    Single,
    Multiple,
    Ordered,
    Record,
}

impl Cardinality {
    pub fn parse(name: &str) -> Result<Cardinality, EvalError> {
        Ok(match name {
            "single" => Cardinality::Single,
            "multiple" => Cardinality::Multiple,
            "ordered" => Cardinality::Ordered,
            "record" => Cardinality::Record,
            other => return Err(EvalError::unknown("cardinality", other)),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Cardinality::Single => "single",
            Cardinality::Multiple => "multiple",
            Cardinality::Ordered => "ordered",
            Cardinality::Record => "record",
        }
    }

    /// Multiple or ordered.
    pub fn is_list(&self) -> bool {
        matches!(self, Cardinality::Multiple | Cardinality::Ordered)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ──────────────────────────────────────────────
// Single values
// ──────────────────────────────────────────────

/// A single base-typed value.
#[derive(Debug, Clone)]
pub enum SingleValue {
    Identifier(String),
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Point(i64, i64),
    Pair(String, String),
    DirectedPair(String, String),
    /// Seconds.
    Duration(f64),
    File(String),
    Uri(String),
    IntOrIdentifier(String),
}

impl SingleValue {
    pub fn base_type(&self) -> BaseType {
        match self {
            SingleValue::Identifier(_) => BaseType::Identifier,
            SingleValue::Boolean(_) => BaseType::Boolean,
            SingleValue::Integer(_) => BaseType::Integer,
            SingleValue::Float(_) => BaseType::Float,
            SingleValue::String(_) => BaseType::String,
            SingleValue::Point(_, _) => BaseType::Point,
            SingleValue::Pair(_, _) => BaseType::Pair,
            SingleValue::DirectedPair(_, _) => BaseType::DirectedPair,
            SingleValue::Duration(_) => BaseType::Duration,
            SingleValue::File(_) => BaseType::File,
            SingleValue::Uri(_) => BaseType::Uri,
            SingleValue::IntOrIdentifier(_) => BaseType::IntOrIdentifier,
        }
    }

    /// Numeric view of an integer or float value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SingleValue::Integer(i) => Some(*i as f64),
            SingleValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Parse the QTI string form of a value of the given base type.
    pub fn parse(base_type: BaseType, s: &str) -> Result<SingleValue, EvalError> {
        let trimmed = s.trim();
        let bad = || EvalError::TypeError {
            message: format!("'{}' is not a valid {} value", s, base_type),
        };
        Ok(match base_type {
            BaseType::Identifier => {
                if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
                    return Err(bad());
                }
                SingleValue::Identifier(trimmed.to_string())
            }
            BaseType::Boolean => match trimmed {
                "true" | "1" => SingleValue::Boolean(true),
                "false" | "0" => SingleValue::Boolean(false),
                _ => return Err(bad()),
            },
            BaseType::Integer => {
                SingleValue::Integer(trimmed.trim_start_matches('+').parse().map_err(|_| bad())?)
            }
            BaseType::Float => SingleValue::Float(parse_float(trimmed).ok_or_else(bad)?),
            BaseType::Duration => {
                let d = parse_float(trimmed).ok_or_else(bad)?;
                if d < 0.0 {
                    return Err(bad());
                }
                SingleValue::Duration(d)
            }
            BaseType::String => SingleValue::String(s.to_string()),
            BaseType::Point => {
                let parts: Vec<&str> = trimmed.split_whitespace().collect();
                if parts.len() != 2 {
                    return Err(bad());
                }
                let x = parts[0].parse().map_err(|_| bad())?;
                let y = parts[1].parse().map_err(|_| bad())?;
                SingleValue::Point(x, y)
            }
            BaseType::Pair | BaseType::DirectedPair => {
                let parts: Vec<&str> = trimmed.split_whitespace().collect();
                if parts.len() != 2 {
                    return Err(bad());
                }
                let (a, b) = (parts[0].to_string(), parts[1].to_string());
                if base_type == BaseType::Pair {
                    SingleValue::Pair(a, b)
                } else {
                    SingleValue::DirectedPair(a, b)
                }
            }
            BaseType::File => SingleValue::File(s.to_string()),
            BaseType::Uri => SingleValue::Uri(trimmed.to_string()),
            BaseType::IntOrIdentifier => {
                if trimmed.is_empty() {
                    return Err(bad());
                }
                SingleValue::IntOrIdentifier(trimmed.to_string())
            }
        })
    }

    /// Parse a single value from JSON: strings use the QTI string form,
    /// numbers and booleans are accepted directly where they fit.
    pub fn from_json(base_type: BaseType, v: &serde_json::Value) -> Result<SingleValue, EvalError> {
        match v {
            serde_json::Value::String(s) => SingleValue::parse(base_type, s),
            serde_json::Value::Bool(b) if base_type == BaseType::Boolean => {
                Ok(SingleValue::Boolean(*b))
            }
            serde_json::Value::Number(n) => match base_type {
                BaseType::Integer => n.as_i64().map(SingleValue::Integer).ok_or_else(|| {
                    EvalError::TypeError {
                        message: format!("{} is not a valid integer value", n),
                    }
                }),
                BaseType::Float | BaseType::Duration => {
                    let f = n.as_f64().ok_or_else(|| EvalError::TypeError {
                        message: format!("{} is not a valid {} value", n, base_type),
                    })?;
                    SingleValue::parse(base_type, &f.to_string())
                }
                BaseType::IntOrIdentifier => Ok(SingleValue::IntOrIdentifier(n.to_string())),
                _ => Err(EvalError::TypeError {
                    message: format!("number {} given for {} value", n, base_type),
                }),
            },
            other => Err(EvalError::TypeError {
                message: format!("cannot read {} value from {}", base_type, other),
            }),
        }
    }
}

fn parse_float(s: &str) -> Option<f64> {
    match s {
        "INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => s.trim_start_matches('+').parse().ok(),
    }
}

impl PartialEq for SingleValue {
    fn eq(&self, other: &Self) -> bool {
        use SingleValue::*;
        match (self, other) {
            (Identifier(a), Identifier(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Point(ax, ay), Point(bx, by)) => ax == bx && ay == by,
            // Pairs are unordered; directed pairs are not.
            (Pair(a1, a2), Pair(b1, b2)) => (a1 == b1 && a2 == b2) || (a1 == b2 && a2 == b1),
            (DirectedPair(a1, a2), DirectedPair(b1, b2)) => a1 == b1 && a2 == b2,
            (Duration(a), Duration(b)) => a == b,
            (File(a), File(b)) => a == b,
            (Uri(a), Uri(b)) => a == b,
            (IntOrIdentifier(a), IntOrIdentifier(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for SingleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SingleValue::Identifier(s)
            | SingleValue::String(s)
            | SingleValue::File(s)
            | SingleValue::Uri(s)
            | SingleValue::IntOrIdentifier(s) => f.write_str(s),
            SingleValue::Boolean(b) => write!(f, "{}", b),
            SingleValue::Integer(i) => write!(f, "{}", i),
            SingleValue::Float(x) | SingleValue::Duration(x) => format_float(*x, f),
            SingleValue::Point(x, y) => write!(f, "{} {}", x, y),
            SingleValue::Pair(a, b) | SingleValue::DirectedPair(a, b) => write!(f, "{} {}", a, b),
        }
    }
}

fn format_float(x: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if x.is_infinite() {
        f.write_str(if x > 0.0 { "INF" } else { "-INF" })
    } else if x.is_nan() {
        f.write_str("NaN")
    } else {
        write!(f, "{:?}", x)
    }
}

// ──────────────────────────────────────────────
// Values
// ──────────────────────────────────────────────

/// A QTI value: NULL or a container of single values.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Single(SingleValue),
    Multiple {
        base_type: BaseType,
        values: Vec<SingleValue>,
    },
    Ordered {
        base_type: BaseType,
        values: Vec<SingleValue>,
    },
    /// Field values are single values or NULL.
    Record(BTreeMap<String, Value>),
}

impl Value {
    pub fn integer(i: i64) -> Value {
        Value::Single(SingleValue::Integer(i))
    }

    /// A float value; non-finite results are NULL.
    pub fn float(f: f64) -> Value {
        if f.is_finite() {
            Value::Single(SingleValue::Float(f))
        } else {
            Value::Null
        }
    }

    pub fn boolean(b: bool) -> Value {
        Value::Single(SingleValue::Boolean(b))
    }

    pub fn identifier(s: impl Into<String>) -> Value {
        Value::Single(SingleValue::Identifier(s.into()))
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::Single(SingleValue::String(s.into()))
    }

    /// A multiple container; empty is NULL.
    pub fn multiple(base_type: BaseType, values: Vec<SingleValue>) -> Value {
        if values.is_empty() {
            Value::Null
        } else {
            Value::Multiple { base_type, values }
        }
    }

    /// An ordered container; empty is NULL.
    pub fn ordered(base_type: BaseType, values: Vec<SingleValue>) -> Value {
        if values.is_empty() {
            Value::Null
        } else {
            Value::Ordered { base_type, values }
        }
    }

    /// A container of the given list cardinality, checking element base types.
    pub fn list(
        cardinality: Cardinality,
        base_type: BaseType,
        values: Vec<SingleValue>,
    ) -> Result<Value, EvalError> {
        if let Some(bad) = values.iter().find(|v| v.base_type() != base_type) {
            return Err(EvalError::TypeError {
                message: format!(
                    "{} container cannot hold {} value '{}'",
                    base_type,
                    bad.base_type(),
                    bad
                ),
            });
        }
        match cardinality {
            Cardinality::Single => match values.len() {
                0 => Ok(Value::Null),
                1 => Ok(Value::Single(values.into_iter().next().ok_or_else(|| {
                    EvalError::Internal {
                        message: "single value vanished".to_string(),
                    }
                })?)),
                n => Err(EvalError::TypeError {
                    message: format!("{} values given for single cardinality", n),
                }),
            },
            Cardinality::Multiple => Ok(Value::multiple(base_type, values)),
            Cardinality::Ordered => Ok(Value::ordered(base_type, values)),
            Cardinality::Record => Err(EvalError::TypeError {
                message: "record values cannot be built from a list".to_string(),
            }),
        }
    }

    /// A record; empty is NULL.
    pub fn record(fields: BTreeMap<String, Value>) -> Value {
        if fields.is_empty() {
            Value::Null
        } else {
            Value::Record(fields)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Cardinality of a non-NULL value.
    pub fn cardinality(&self) -> Option<Cardinality> {
        match self {
            Value::Null => None,
            Value::Single(_) => Some(Cardinality::Single),
            Value::Multiple { .. } => Some(Cardinality::Multiple),
            Value::Ordered { .. } => Some(Cardinality::Ordered),
            Value::Record(_) => Some(Cardinality::Record),
        }
    }

    /// Base type of a non-NULL, non-record value.
    pub fn base_type(&self) -> Option<BaseType> {
        match self {
            Value::Single(v) => Some(v.base_type()),
            Value::Multiple { base_type, .. } | Value::Ordered { base_type, .. } => {
                Some(*base_type)
            }
            Value::Null | Value::Record(_) => None,
        }
    }

    pub fn as_single(&self) -> Option<&SingleValue> {
        match self {
            Value::Single(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this is a single integer or float.
    pub fn is_numeric(&self) -> bool {
        self.as_single().and_then(|s| s.as_f64()).is_some()
    }

    /// Numeric accessor for single integer or float values.
    pub fn as_f64(&self) -> Result<f64, EvalError> {
        self.as_single()
            .and_then(|s| s.as_f64())
            .ok_or_else(|| EvalError::TypeError {
                message: format!("expected a numeric single value, got {}", self.describe()),
            })
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Single(SingleValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Single(SingleValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    /// Identifier (or string) content of a single value.
    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            Value::Single(SingleValue::Identifier(s)) | Value::Single(SingleValue::String(s)) => {
                Some(s)
            }
            _ => None,
        }
    }

    /// Elements of a single, multiple or ordered value.
    pub fn elements(&self) -> &[SingleValue] {
        match self {
            Value::Single(v) => std::slice::from_ref(v),
            Value::Multiple { values, .. } | Value::Ordered { values, .. } => values,
            Value::Null | Value::Record(_) => &[],
        }
    }

    /// Whether the value fits a declaration's cardinality and base type.
    pub fn conforms_to(&self, cardinality: Cardinality, base_type: Option<BaseType>) -> bool {
        match self {
            Value::Null => true,
            Value::Record(_) => cardinality == Cardinality::Record,
            _ => {
                self.cardinality() == Some(cardinality)
                    && (base_type.is_none() || self.base_type() == base_type)
            }
        }
    }

    /// Short human-readable description for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Record(_) => "record".to_string(),
            other => format!(
                "{} {}",
                other.cardinality().map(|c| c.name()).unwrap_or("?"),
                other.base_type().map(|b| b.name()).unwrap_or("?")
            ),
        }
    }

    /// Parse a value for a declaration from JSON.
    ///
    /// Single values may be a bare JSON scalar or a one-element array;
    /// multiple/ordered values are arrays; records are objects mapping
    /// field identifiers to `{"baseType": ..., "value": ...}`.
    pub fn from_json(
        cardinality: Cardinality,
        base_type: Option<BaseType>,
        v: &serde_json::Value,
    ) -> Result<Value, EvalError> {
        if v.is_null() {
            return Ok(Value::Null);
        }
        if cardinality == Cardinality::Record {
            let obj = v.as_object().ok_or_else(|| EvalError::TypeError {
                message: "record value must be an object".to_string(),
            })?;
            let mut fields = BTreeMap::new();
            for (name, field) in obj {
                let bt = BaseType::parse(&super::get_str(field, "baseType")?)?;
                let value = match field.get("value") {
                    None | Some(serde_json::Value::Null) => Value::Null,
                    Some(fv) => Value::Single(SingleValue::from_json(bt, fv)?),
                };
                fields.insert(name.clone(), value);
            }
            return Ok(Value::record(fields));
        }
        let bt = base_type.ok_or_else(|| EvalError::TypeError {
            message: format!("{} value needs a baseType", cardinality),
        })?;
        let items: Vec<&serde_json::Value> = match v {
            serde_json::Value::Array(arr) => arr.iter().collect(),
            single => vec![single],
        };
        let values = items
            .into_iter()
            .map(|item| SingleValue::from_json(bt, item))
            .collect::<Result<Vec<_>, _>>()?;
        Value::list(cardinality, bt, values)
    }
}

/// Multiset equality for unordered containers.
fn multiset_eq(a: &[SingleValue], b: &[SingleValue]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    'outer: for x in a {
        for (i, y) in b.iter().enumerate() {
            if !used[i] && x == y {
                used[i] = true;
                continue 'outer;
            }
        }
        return false;
    }
    true
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Single(a), Value::Single(b)) => a == b,
            (
                Value::Multiple {
                    base_type: ta,
                    values: a,
                },
                Value::Multiple {
                    base_type: tb,
                    values: b,
                },
            ) => ta == tb && multiset_eq(a, b),
            (
                Value::Ordered {
                    base_type: ta,
                    values: a,
                },
                Value::Ordered {
                    base_type: tb,
                    values: b,
                },
            ) => ta == tb && a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Single(v) => write!(f, "{}", v),
            Value::Multiple { values, .. } | Value::Ordered { values, .. } => {
                let open = if matches!(self, Value::Ordered { .. }) {
                    '<'
                } else {
                    '['
                };
                let close = if open == '<' { '>' } else { ']' };
                write!(f, "{}", open)?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "{}", close)
            }
            Value::Record(fields) => {
                f.write_str("{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

fn single_to_json(v: &SingleValue) -> serde_json::Value {
    match v {
        SingleValue::Boolean(b) => serde_json::Value::Bool(*b),
        SingleValue::Integer(i) => serde_json::json!(i),
        SingleValue::Float(x) | SingleValue::Duration(x) => serde_json::Number::from_f64(*x)
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| serde_json::Value::String(v.to_string())),
        other => serde_json::Value::String(other.to_string()),
    }
}

/// Convert a value to its JSON result form.
pub fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Single(s) => single_to_json(s),
        Value::Multiple { values, .. } | Value::Ordered { values, .. } => {
            serde_json::Value::Array(values.iter().map(single_to_json).collect())
        }
        Value::Record(fields) => {
            let map: serde_json::Map<String, serde_json::Value> = fields
                .iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ident(s: &str) -> SingleValue {
        SingleValue::Identifier(s.to_string())
    }

    #[test]
    fn null_has_no_base_type() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Null.base_type(), None);
        assert_eq!(Value::Null.cardinality(), None);
    }

    #[test]
    fn empty_containers_are_null() {
        assert!(Value::multiple(BaseType::Integer, vec![]).is_null());
        assert!(Value::ordered(BaseType::Integer, vec![]).is_null());
        assert!(Value::record(BTreeMap::new()).is_null());
    }

    #[test]
    fn non_finite_float_is_null() {
        assert!(Value::float(f64::NAN).is_null());
        assert!(Value::float(f64::INFINITY).is_null());
        assert_eq!(Value::float(1.5).as_f64().unwrap(), 1.5);
    }

    #[test]
    fn numeric_accessor_rejects_non_numeric() {
        assert_eq!(Value::integer(3).as_f64().unwrap(), 3.0);
        match Value::identifier("A").as_f64() {
            Err(EvalError::TypeError { .. }) => {}
            other => panic!("expected TypeError, got {:?}", other),
        }
        assert!(Value::Null.as_f64().is_err());
    }

    #[test]
    fn multiple_equality_ignores_order() {
        let a = Value::multiple(BaseType::Identifier, vec![ident("A"), ident("B"), ident("A")]);
        let b = Value::multiple(BaseType::Identifier, vec![ident("B"), ident("A"), ident("A")]);
        let c = Value::multiple(BaseType::Identifier, vec![ident("B"), ident("B"), ident("A")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn ordered_equality_respects_order() {
        let a = Value::ordered(BaseType::Identifier, vec![ident("A"), ident("B")]);
        let b = Value::ordered(BaseType::Identifier, vec![ident("B"), ident("A")]);
        assert_ne!(a, b);
    }

    #[test]
    fn pair_is_unordered_directed_pair_is_not() {
        let p1 = SingleValue::Pair("A".into(), "B".into());
        let p2 = SingleValue::Pair("B".into(), "A".into());
        assert_eq!(p1, p2);
        let d1 = SingleValue::DirectedPair("A".into(), "B".into());
        let d2 = SingleValue::DirectedPair("B".into(), "A".into());
        assert_ne!(d1, d2);
    }

    #[test]
    fn integer_and_float_are_distinct() {
        assert_ne!(Value::integer(1), Value::float(1.0));
    }

    #[test]
    fn parse_string_forms() {
        assert_eq!(
            SingleValue::parse(BaseType::Point, "10 20").unwrap(),
            SingleValue::Point(10, 20)
        );
        assert_eq!(
            SingleValue::parse(BaseType::Boolean, "1").unwrap(),
            SingleValue::Boolean(true)
        );
        assert_eq!(
            SingleValue::parse(BaseType::Float, "INF").unwrap().as_f64(),
            Some(f64::INFINITY)
        );
        assert!(SingleValue::parse(BaseType::Identifier, "two words").is_err());
        assert!(SingleValue::parse(BaseType::Integer, "1.5").is_err());
        assert!(SingleValue::parse(BaseType::Duration, "-1").is_err());
    }

    #[test]
    fn from_json_single_and_containers() {
        let v = Value::from_json(Cardinality::Single, Some(BaseType::Float), &json!(2.5)).unwrap();
        assert_eq!(v, Value::float(2.5));
        let v = Value::from_json(Cardinality::Single, Some(BaseType::Float), &json!(["3"])).unwrap();
        assert_eq!(v, Value::float(3.0));
        let v = Value::from_json(
            Cardinality::Multiple,
            Some(BaseType::Identifier),
            &json!(["A", "B"]),
        )
        .unwrap();
        assert_eq!(v.elements().len(), 2);
        assert!(Value::from_json(
            Cardinality::Single,
            Some(BaseType::Integer),
            &json!(["1", "2"])
        )
        .is_err());
    }

    #[test]
    fn from_json_record() {
        let v = Value::from_json(
            Cardinality::Record,
            None,
            &json!({"x": {"baseType": "integer", "value": 3}, "y": {"baseType": "float"}}),
        )
        .unwrap();
        match v {
            Value::Record(fields) => {
                assert_eq!(fields["x"], Value::integer(3));
                assert!(fields["y"].is_null());
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn json_result_form() {
        let v = Value::ordered(BaseType::Integer, vec![SingleValue::Integer(1), SingleValue::Integer(2)]);
        assert_eq!(value_to_json(&v), json!([1, 2]));
        assert_eq!(value_to_json(&Value::identifier("A")), json!("A"));
        assert_eq!(value_to_json(&Value::Null), serde_json::Value::Null);
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::float(1.0).to_string(), "1.0");
        assert_eq!(
            Value::Single(SingleValue::Point(3, 4)).to_string(),
            "3 4"
        );
        assert_eq!(Value::Null.to_string(), "NULL");
    }

    #[test]
    fn conformance_to_declaration() {
        let v = Value::integer(2);
        assert!(v.conforms_to(Cardinality::Single, Some(BaseType::Integer)));
        assert!(!v.conforms_to(Cardinality::Single, Some(BaseType::Float)));
        assert!(!v.conforms_to(Cardinality::Multiple, Some(BaseType::Integer)));
        assert!(Value::Null.conforms_to(Cardinality::Multiple, Some(BaseType::Integer)));
    }
}
