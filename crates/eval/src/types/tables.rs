//! Scoring tables owned by declarations: Mapping, AreaMapping and
//! LookupTable (match and interpolation variants).

use super::values::{BaseType, SingleValue};
use super::{get_str, obj_list, opt_bool, opt_f64, EvalError};

// ──────────────────────────────────────────────
// Mapping
// ──────────────────────────────────────────────

/// Response-to-score mapping owned by a response declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub default_value: f64,
    pub entries: Vec<MapEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    pub map_key: SingleValue,
    pub mapped_value: f64,
    pub case_sensitive: bool,
}

// ──────────────────────────────────────────────
// AreaMapping
// ──────────────────────────────────────────────

/// Point-to-score mapping owned by a `point` response declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaMapping {
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub default_value: f64,
    pub entries: Vec<AreaMapEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AreaMapEntry {
    pub shape: Shape,
    pub coords: Vec<i64>,
    pub mapped_value: f64,
}

/// Area shapes used by AreaMapping and `inside`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Default,
    Rect,
    Circle,
    Poly,
    Ellipse,
}

impl Shape {
    pub fn parse(name: &str) -> Result<Shape, EvalError> {
        Ok(match name {
            "default" => Shape::Default,
            "rect" => Shape::Rect,
            "circle" => Shape::Circle,
            "poly" => Shape::Poly,
            "ellipse" => Shape::Ellipse,
            other => return Err(EvalError::unknown("shape", other)),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Shape::Default => "default",
            Shape::Rect => "rect",
            Shape::Circle => "circle",
            Shape::Poly => "poly",
            Shape::Ellipse => "ellipse",
        }
    }
}

// ──────────────────────────────────────────────
// LookupTable
// ──────────────────────────────────────────────

/// Lookup table owned by an outcome declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupTable {
    Match(MatchTable),
    Interpolation(InterpolationTable),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchTable {
    pub default_value: Option<SingleValue>,
    pub entries: Vec<MatchTableEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchTableEntry {
    pub source_value: i64,
    pub target_value: SingleValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationTable {
    pub default_value: Option<SingleValue>,
    pub entries: Vec<InterpolationTableEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationTableEntry {
    pub source_value: f64,
    pub include_boundary: bool,
    pub target_value: SingleValue,
}

impl LookupTable {
    pub fn default_value(&self) -> Option<&SingleValue> {
        match self {
            LookupTable::Match(t) => t.default_value.as_ref(),
            LookupTable::Interpolation(t) => t.default_value.as_ref(),
        }
    }

    /// Source values of all entries, as floats, in declaration order.
    pub fn source_values(&self) -> Vec<f64> {
        match self {
            LookupTable::Match(t) => t.entries.iter().map(|e| e.source_value as f64).collect(),
            LookupTable::Interpolation(t) => t.entries.iter().map(|e| e.source_value).collect(),
        }
    }
}

// ──────────────────────────────────────────────
// Parsing
// ──────────────────────────────────────────────

fn key_type(base_type: Option<BaseType>, owner: &str) -> Result<BaseType, EvalError> {
    base_type.ok_or_else(|| EvalError::deserialize(format!("{} requires a baseType", owner)))
}

fn mapped_value(entry: &serde_json::Value) -> Result<f64, EvalError> {
    opt_f64(entry, "mappedValue")
        .ok_or_else(|| EvalError::deserialize("map entry missing numeric 'mappedValue'"))
}

/// Parse a `mapping` object for a response declaration of the given base type.
pub fn parse_mapping(
    v: &serde_json::Value,
    base_type: Option<BaseType>,
) -> Result<Mapping, EvalError> {
    let bt = key_type(base_type, "mapping")?;
    let entries = obj_list(v, "mapEntries")?
        .iter()
        .map(|e| {
            let key = e
                .get("mapKey")
                .ok_or_else(|| EvalError::deserialize("map entry missing 'mapKey'"))?;
            Ok(MapEntry {
                map_key: SingleValue::from_json(bt, key)?,
                mapped_value: mapped_value(e)?,
                case_sensitive: opt_bool(e, "caseSensitive", true),
            })
        })
        .collect::<Result<Vec<_>, EvalError>>()?;
    Ok(Mapping {
        lower_bound: opt_f64(v, "lowerBound"),
        upper_bound: opt_f64(v, "upperBound"),
        default_value: opt_f64(v, "defaultValue").unwrap_or(0.0),
        entries,
    })
}

/// Parse coords given either as a JSON array of integers or a comma-separated string.
pub(crate) fn parse_coords(v: Option<&serde_json::Value>) -> Result<Vec<i64>, EvalError> {
    match v {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Array(arr)) => arr
            .iter()
            .map(|c| {
                c.as_i64()
                    .ok_or_else(|| EvalError::deserialize("coords must be integers"))
            })
            .collect(),
        Some(serde_json::Value::String(s)) => s
            .split(',')
            .map(|c| {
                c.trim()
                    .parse::<i64>()
                    .map_err(|_| EvalError::deserialize(format!("invalid coords '{}'", s)))
            })
            .collect(),
        Some(_) => Err(EvalError::deserialize("coords must be a list or string")),
    }
}

pub fn parse_area_mapping(v: &serde_json::Value) -> Result<AreaMapping, EvalError> {
    let entries = obj_list(v, "areaMapEntries")?
        .iter()
        .map(|e| {
            Ok(AreaMapEntry {
                shape: Shape::parse(&get_str(e, "shape")?)?,
                coords: parse_coords(e.get("coords"))?,
                mapped_value: mapped_value(e)?,
            })
        })
        .collect::<Result<Vec<_>, EvalError>>()?;
    Ok(AreaMapping {
        lower_bound: opt_f64(v, "lowerBound"),
        upper_bound: opt_f64(v, "upperBound"),
        default_value: opt_f64(v, "defaultValue").unwrap_or(0.0),
        entries,
    })
}

fn parse_target(
    e: &serde_json::Value,
    field: &str,
    bt: BaseType,
) -> Result<Option<SingleValue>, EvalError> {
    match e.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(t) => SingleValue::from_json(bt, t).map(Some),
    }
}

/// Parse a lookup table object: `{"matchTable": {...}}` or `{"interpolationTable": {...}}`.
pub fn parse_lookup_table(
    v: &serde_json::Value,
    base_type: Option<BaseType>,
) -> Result<LookupTable, EvalError> {
    let bt = key_type(base_type, "lookup table")?;
    if let Some(t) = v.get("matchTable") {
        let entries = obj_list(t, "entries")?
            .iter()
            .map(|e| {
                Ok(MatchTableEntry {
                    source_value: e.get("sourceValue").and_then(|s| s.as_i64()).ok_or_else(
                        || EvalError::deserialize("matchTableEntry needs an integer 'sourceValue'"),
                    )?,
                    target_value: parse_target(e, "targetValue", bt)?.ok_or_else(|| {
                        EvalError::deserialize("matchTableEntry missing 'targetValue'")
                    })?,
                })
            })
            .collect::<Result<Vec<_>, EvalError>>()?;
        return Ok(LookupTable::Match(MatchTable {
            default_value: parse_target(t, "defaultValue", bt)?,
            entries,
        }));
    }
    if let Some(t) = v.get("interpolationTable") {
        let entries = obj_list(t, "entries")?
            .iter()
            .map(|e| {
                Ok(InterpolationTableEntry {
                    source_value: opt_f64(e, "sourceValue").ok_or_else(|| {
                        EvalError::deserialize("interpolationTableEntry needs 'sourceValue'")
                    })?,
                    include_boundary: opt_bool(e, "includeBoundary", true),
                    target_value: parse_target(e, "targetValue", bt)?.ok_or_else(|| {
                        EvalError::deserialize("interpolationTableEntry missing 'targetValue'")
                    })?,
                })
            })
            .collect::<Result<Vec<_>, EvalError>>()?;
        return Ok(LookupTable::Interpolation(InterpolationTable {
            default_value: parse_target(t, "defaultValue", bt)?,
            entries,
        }));
    }
    Err(EvalError::unknown(
        "lookup table",
        &v.as_object()
            .and_then(|o| o.keys().next().cloned())
            .unwrap_or_default(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mapping_defaults() {
        let m = parse_mapping(
            &json!({"mapEntries": [{"mapKey": "A", "mappedValue": 1}]}),
            Some(BaseType::Identifier),
        )
        .unwrap();
        assert_eq!(m.default_value, 0.0);
        assert_eq!(m.lower_bound, None);
        assert!(m.entries[0].case_sensitive);
    }

    #[test]
    fn mapping_needs_base_type() {
        assert!(parse_mapping(&json!({}), None).is_err());
    }

    #[test]
    fn coords_from_string() {
        assert_eq!(
            parse_coords(Some(&json!("10, 20,5"))).unwrap(),
            vec![10, 20, 5]
        );
        assert!(parse_coords(Some(&json!("a,b"))).is_err());
    }

    #[test]
    fn unknown_shape_is_construction_error() {
        let v = json!({"areaMapEntries": [{"shape": "star", "coords": [1], "mappedValue": 1}]});
        assert_eq!(
            parse_area_mapping(&v).unwrap_err(),
            EvalError::unknown("shape", "star")
        );
    }

    #[test]
    fn lookup_tables() {
        let t = parse_lookup_table(
            &json!({"matchTable": {"defaultValue": "none", "entries": [
                {"sourceValue": 0, "targetValue": "low"},
                {"sourceValue": 1, "targetValue": "high"}
            ]}}),
            Some(BaseType::Identifier),
        )
        .unwrap();
        assert_eq!(t.source_values(), vec![0.0, 1.0]);
        assert_eq!(
            t.default_value(),
            Some(&SingleValue::Identifier("none".to_string()))
        );

        let t = parse_lookup_table(
            &json!({"interpolationTable": {"entries": [
                {"sourceValue": 10, "includeBoundary": false, "targetValue": 2}
            ]}}),
            Some(BaseType::Integer),
        )
        .unwrap();
        match t {
            LookupTable::Interpolation(it) => {
                assert!(!it.entries[0].include_boundary);
                assert_eq!(it.default_value, None);
            }
            other => panic!("expected interpolation table, got {:?}", other),
        }
    }
}
