//! Lookup/mapping engine: Mapping, AreaMapping, MatchTable and
//! InterpolationTable transformations.

use crate::types::{
    AreaMapping, BaseType, Cardinality, LookupTable, MapEntry, Mapping, SingleValue, Value,
    VariableDeclaration,
};

fn clamp(x: f64, lower: Option<f64>, upper: Option<f64>) -> f64 {
    let x = match lower {
        Some(l) if x < l => l,
        _ => x,
    };
    match upper {
        Some(u) if x > u => u,
        _ => x,
    }
}

fn entry_matches(entry: &MapEntry, value: &SingleValue) -> bool {
    match (&entry.map_key, value) {
        (SingleValue::String(key), SingleValue::String(s)) if !entry.case_sensitive => {
            key.to_lowercase() == s.to_lowercase()
        }
        (key, v) => key == v,
    }
}

/// Remove one element equal to `value`, if there is one.
fn remove_one(remaining: &mut Vec<SingleValue>, value: &SingleValue) {
    if let Some(pos) = remaining.iter().position(|r| r == value) {
        remaining.remove(pos);
    }
}

/// Sum mapped values over a container: each entry contributes at most
/// once, every element no entry matched contributes the default.
fn sum_container<E>(
    entries: &[E],
    values: &[SingleValue],
    default_value: f64,
    mapped: impl Fn(&E) -> f64,
    matches: impl Fn(&E, &SingleValue) -> bool,
) -> f64 {
    let mut remaining = values.to_vec();
    let mut sum = 0.0;
    for entry in entries {
        let mut counted = false;
        for value in values {
            if matches(entry, value) {
                if !counted {
                    sum += mapped(entry);
                    counted = true;
                }
                remove_one(&mut remaining, value);
            }
        }
    }
    sum + default_value * remaining.len() as f64
}

/// `mapResponse`: transform a response value through its declaration's mapping.
pub fn map_response(mapping: &Mapping, cardinality: Cardinality, value: &Value) -> Value {
    let raw = match (cardinality, value) {
        (Cardinality::Single, Value::Single(v)) => mapping
            .entries
            .iter()
            .find(|e| entry_matches(e, v))
            .map(|e| e.mapped_value)
            .unwrap_or(mapping.default_value),
        (c, Value::Multiple { values, .. } | Value::Ordered { values, .. }) if c.is_list() => {
            sum_container(
                &mapping.entries,
                values,
                mapping.default_value,
                |e| e.mapped_value,
                entry_matches,
            )
        }
        _ => mapping.default_value,
    };
    Value::float(clamp(raw, mapping.lower_bound, mapping.upper_bound))
}

/// `mapResponsePoint`: transform point responses through an area mapping.
pub fn map_response_point(area_mapping: &AreaMapping, value: &Value) -> Value {
    let inside = |entry: &crate::types::AreaMapEntry, v: &SingleValue| match v {
        SingleValue::Point(x, y) => entry.shape.contains(&entry.coords, *x, *y),
        _ => false,
    };
    let raw = match value {
        Value::Single(v) => area_mapping
            .entries
            .iter()
            .find(|e| inside(e, v))
            .map(|e| e.mapped_value)
            .unwrap_or(area_mapping.default_value),
        Value::Multiple { values, .. } | Value::Ordered { values, .. } => sum_container(
            &area_mapping.entries,
            values,
            area_mapping.default_value,
            |e| e.mapped_value,
            inside,
        ),
        _ => area_mapping.default_value,
    };
    Value::float(clamp(raw, area_mapping.lower_bound, area_mapping.upper_bound))
}

/// Table default, or 0 / 0.0 for single integer / float outcomes, else NULL.
pub fn lookup_default(table: &LookupTable, declaration: &VariableDeclaration) -> Value {
    if let Some(d) = table.default_value() {
        return Value::Single(d.clone());
    }
    match (declaration.cardinality, declaration.base_type) {
        (Cardinality::Single, Some(BaseType::Integer)) => Value::integer(0),
        (Cardinality::Single, Some(BaseType::Float)) => Value::float(0.0),
        _ => Value::Null,
    }
}

/// Look a numeric source value up in the table. Non-numeric or NULL
/// sources, and sources no entry matches, give the default.
pub fn lookup(table: &LookupTable, declaration: &VariableDeclaration, source: &Value) -> Value {
    let found = match table {
        LookupTable::Match(t) => source.as_i64().and_then(|x| {
            t.entries
                .iter()
                .find(|e| e.source_value == x)
                .map(|e| e.target_value.clone())
        }),
        LookupTable::Interpolation(t) => source.as_f64().ok().and_then(|x| {
            t.entries
                .iter()
                .find(|e| x > e.source_value || (e.include_boundary && x == e.source_value))
                .map(|e| e.target_value.clone())
        }),
    };
    match found {
        Some(v) => Value::Single(v),
        None => lookup_default(table, declaration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::declarations::{parse_declaration, VariableKind};
    use serde_json::json;

    fn string(s: &str) -> SingleValue {
        SingleValue::String(s.to_string())
    }

    fn ident(s: &str) -> SingleValue {
        SingleValue::Identifier(s.to_string())
    }

    fn case_mapping() -> Mapping {
        Mapping {
            lower_bound: None,
            upper_bound: None,
            default_value: 0.0,
            entries: vec![
                MapEntry {
                    map_key: string("A"),
                    mapped_value: 1.0,
                    case_sensitive: true,
                },
                MapEntry {
                    map_key: string("b"),
                    mapped_value: 2.0,
                    case_sensitive: false,
                },
            ],
        }
    }

    #[test]
    fn single_mapping_honours_case() {
        let m = case_mapping();
        assert_eq!(
            map_response(&m, Cardinality::Single, &Value::string("a")),
            Value::float(0.0)
        );
        assert_eq!(
            map_response(&m, Cardinality::Single, &Value::string("B")),
            Value::float(2.0)
        );
        assert_eq!(
            map_response(&m, Cardinality::Single, &Value::string("A")),
            Value::float(1.0)
        );
    }

    #[test]
    fn container_mapping_counts_entries_once() {
        let m = Mapping {
            lower_bound: None,
            upper_bound: None,
            default_value: -0.5,
            entries: vec![
                MapEntry {
                    map_key: ident("B"),
                    mapped_value: 1.0,
                    case_sensitive: true,
                },
                MapEntry {
                    map_key: ident("C"),
                    mapped_value: 0.5,
                    case_sensitive: true,
                },
            ],
        };
        let v = Value::multiple(BaseType::Identifier, vec![ident("B"), ident("B"), ident("C")]);
        assert_eq!(map_response(&m, Cardinality::Multiple, &v), Value::float(1.5));
        let v = Value::multiple(BaseType::Identifier, vec![ident("C"), ident("X")]);
        assert_eq!(map_response(&m, Cardinality::Multiple, &v), Value::float(0.0));
    }

    #[test]
    fn mapping_bounds_and_null() {
        let mut m = case_mapping();
        m.upper_bound = Some(2.5);
        m.lower_bound = Some(0.5);
        let v = Value::multiple(BaseType::String, vec![string("A"), string("b")]);
        assert_eq!(map_response(&m, Cardinality::Multiple, &v), Value::float(2.5));
        assert_eq!(
            map_response(&m, Cardinality::Single, &Value::Null),
            Value::float(0.5)
        );
    }

    #[test]
    fn area_mapping_counts_each_area_once() {
        let area = parse_declaration(
            &json!({
                "identifier": "R", "cardinality": "multiple", "baseType": "point",
                "areaMapping": {"defaultValue": 0, "areaMapEntries": [
                    {"shape": "circle", "coords": [10, 10, 5], "mappedValue": 1},
                    {"shape": "circle", "coords": [12, 10, 5], "mappedValue": 2}
                ]}
            }),
            VariableKind::Response,
        )
        .unwrap();
        let am = area.area_mapping().unwrap();
        let p = SingleValue::Point(11, 10);
        let v = Value::multiple(BaseType::Point, vec![p.clone(), p]);
        assert_eq!(map_response_point(am, &v), Value::float(3.0));
        let single = Value::Single(SingleValue::Point(100, 100));
        assert_eq!(map_response_point(am, &single), Value::float(0.0));
    }

    fn outcome(table: serde_json::Value, base_type: &str) -> VariableDeclaration {
        parse_declaration(
            &json!({"identifier": "O", "cardinality": "single", "baseType": base_type, "lookupTable": table}),
            VariableKind::Outcome,
        )
        .unwrap()
    }

    #[test]
    fn match_table() {
        let d = outcome(
            json!({"matchTable": {"defaultValue": "none", "entries": [
                {"sourceValue": 0, "targetValue": "low"},
                {"sourceValue": 1, "targetValue": "high"}
            ]}}),
            "identifier",
        );
        let t = d.lookup_table().unwrap();
        assert_eq!(lookup(t, &d, &Value::integer(1)), Value::identifier("high"));
        assert_eq!(lookup(t, &d, &Value::integer(2)), Value::identifier("none"));
        assert_eq!(lookup(t, &d, &Value::Null), Value::identifier("none"));
    }

    #[test]
    fn interpolation_boundaries() {
        let d = outcome(
            json!({"interpolationTable": {"defaultValue": "fail", "entries": [
                {"sourceValue": 10, "includeBoundary": true, "targetValue": "pass"}
            ]}}),
            "identifier",
        );
        let t = d.lookup_table().unwrap();
        assert_eq!(lookup(t, &d, &Value::float(10.0)), Value::identifier("pass"));

        let d = outcome(
            json!({"interpolationTable": {"entries": [
                {"sourceValue": 10, "includeBoundary": false, "targetValue": 3},
                {"sourceValue": 5, "targetValue": 2}
            ]}}),
            "integer",
        );
        let t = d.lookup_table().unwrap();
        assert_eq!(lookup(t, &d, &Value::integer(10)), Value::integer(2));
        assert_eq!(lookup(t, &d, &Value::integer(11)), Value::integer(3));
        assert_eq!(lookup(t, &d, &Value::integer(1)), Value::integer(0));
    }
}
