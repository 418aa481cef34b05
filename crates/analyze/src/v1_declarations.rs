//! V1 -- Declarations.
//!
//! Identifier uniqueness across every variable family of a document,
//! built-in variables redeclared with the wrong shape, default and
//! correct values that do not fit their declaration, and the scoring
//! table rules: Mapping, AreaMapping and LookupTable.

use std::collections::BTreeSet;

use qti_eval::types::declarations::{is_builtin, COMPLETION_STATUS, DURATION, NUM_ATTEMPTS};
use qti_eval::types::{
    AreaMapping, BaseType, Cardinality, LookupTable, Mapping, Shape, VariableDeclaration,
};

use crate::package::{Document, ValidationPackage};
use crate::report::ValidationItem;
use crate::walk::{child, indexed};

const PASS: &str = "v1";

/// V1 -- check every declaration of every built document.
pub fn check_declarations(package: &ValidationPackage) -> Vec<ValidationItem> {
    let mut items = Vec::new();
    for doc in package.documents() {
        let groups: Vec<(&str, &[VariableDeclaration])> = match doc {
            Document::Item(item) => vec![
                ("responseDeclarations", item.response_declarations.as_slice()),
                ("outcomeDeclarations", item.outcome_declarations.as_slice()),
                ("templateDeclarations", item.template_declarations.as_slice()),
            ],
            Document::Test(test) => {
                vec![("outcomeDeclarations", test.outcome_declarations.as_slice())]
            }
        };

        let mut seen = BTreeSet::new();
        for (field, declarations) in groups {
            for (i, d) in declarations.iter().enumerate() {
                let path = indexed(doc.identifier(), field, i);
                if !seen.insert(d.identifier.as_str()) {
                    items.push(ValidationItem::error(
                        PASS,
                        &path,
                        format!("identifier '{}' is declared more than once", d.identifier),
                    ));
                }
                check_builtin(doc, d, &path, &mut items);
                check_values(d, &path, &mut items);
                if let Some(mapping) = d.mapping() {
                    check_mapping(d, mapping, &child(&path, "mapping"), &mut items);
                }
                if let Some(area_mapping) = d.area_mapping() {
                    check_area_mapping(d, area_mapping, &child(&path, "areaMapping"), &mut items);
                }
                if let Some(table) = d.lookup_table() {
                    check_lookup_table(d, table, &child(&path, "lookupTable"), &mut items);
                }
                if let (Some(min), Some(max)) = (d.normal_minimum(), d.normal_maximum()) {
                    if min > max {
                        items.push(ValidationItem::error(
                            PASS,
                            &path,
                            "normalMinimum is greater than normalMaximum",
                        ));
                    }
                }
            }
        }
    }
    items
}

fn check_builtin(
    doc: Document<'_>,
    d: &VariableDeclaration,
    path: &str,
    items: &mut Vec<ValidationItem>,
) {
    if !is_builtin(&d.identifier) {
        return;
    }
    let expected = match (doc, d.identifier.as_str()) {
        (Document::Test(_), DURATION) => VariableDeclaration::test_duration(),
        (Document::Test(_), _) => return,
        (Document::Item(_), COMPLETION_STATUS) => VariableDeclaration::completion_status(),
        (Document::Item(_), NUM_ATTEMPTS) => VariableDeclaration::num_attempts(),
        (Document::Item(_), _) => VariableDeclaration::duration(),
    };
    if d.kind() != expected.kind()
        || d.cardinality != expected.cardinality
        || d.base_type != expected.base_type
    {
        items.push(ValidationItem::error(
            PASS,
            path,
            format!(
                "built-in variable '{}' must be a {} {} {} variable",
                d.identifier,
                expected.cardinality,
                expected.base_type.map(|b| b.name()).unwrap_or("record"),
                expected.kind().name()
            ),
        ));
    }
}

fn check_values(d: &VariableDeclaration, path: &str, items: &mut Vec<ValidationItem>) {
    let values = [
        ("defaultValue", d.default_value.as_ref()),
        ("correctResponse", d.correct_response()),
    ];
    for (field, value) in values {
        if let Some(value) = value {
            if !d.accepts(value) {
                items.push(ValidationItem::error(
                    PASS,
                    child(path, field),
                    format!(
                        "{} is {} but '{}' is {} {}",
                        field,
                        value.describe(),
                        d.identifier,
                        d.cardinality,
                        d.base_type.map(|b| b.name()).unwrap_or("record")
                    ),
                ));
            }
        }
    }
}

fn check_bounds(
    lower: Option<f64>,
    upper: Option<f64>,
    path: &str,
    items: &mut Vec<ValidationItem>,
) {
    if let (Some(lower), Some(upper)) = (lower, upper) {
        if lower > upper {
            items.push(ValidationItem::error(
                PASS,
                path,
                "upperBound cannot be less than lowerBound",
            ));
        }
    }
}

fn check_mapping(
    d: &VariableDeclaration,
    mapping: &Mapping,
    path: &str,
    items: &mut Vec<ValidationItem>,
) {
    check_bounds(mapping.lower_bound, mapping.upper_bound, path, items);
    if matches!(d.base_type, Some(BaseType::File) | Some(BaseType::Duration)) {
        items.push(ValidationItem::error(
            PASS,
            path,
            "file or duration base types cannot be used with a mapping",
        ));
    }
    if d.cardinality == Cardinality::Record {
        items.push(ValidationItem::error(
            PASS,
            path,
            "record variables cannot be mapped",
        ));
    }
    if d.base_type != Some(BaseType::String) && mapping.entries.iter().any(|e| !e.case_sensitive) {
        items.push(ValidationItem::error(
            PASS,
            path,
            "only string base types may use case-insensitive mapEntries",
        ));
    }
    for (i, entry) in mapping.entries.iter().enumerate() {
        if mapping.entries[..i].iter().any(|e| e.map_key == entry.map_key) {
            items.push(ValidationItem::warning(
                PASS,
                indexed(path, "mapEntries", i),
                format!("mapKey '{}' repeats an earlier entry and is never used", entry.map_key),
            ));
        }
    }
}

fn check_area_mapping(
    d: &VariableDeclaration,
    mapping: &AreaMapping,
    path: &str,
    items: &mut Vec<ValidationItem>,
) {
    check_bounds(mapping.lower_bound, mapping.upper_bound, path, items);
    if d.base_type.is_some_and(|bt| bt != BaseType::Point) {
        items.push(ValidationItem::error(
            PASS,
            path,
            "areaMapping requires base type point",
        ));
    }
    for (i, entry) in mapping.entries.iter().enumerate() {
        if let Some(problem) = coords_problem(entry.shape, &entry.coords) {
            items.push(ValidationItem::error(
                PASS,
                indexed(path, "areaMapEntries", i),
                problem,
            ));
        }
    }
}

/// What is wrong with a coords list for a shape, if anything.
pub(crate) fn coords_problem(shape: Shape, coords: &[i64]) -> Option<String> {
    let expected = match shape {
        Shape::Default => return None,
        Shape::Rect | Shape::Ellipse => 4,
        Shape::Circle => 3,
        Shape::Poly => {
            if coords.len() < 6 || coords.len() % 2 != 0 {
                return Some(format!(
                    "poly needs an even number of at least 6 coords, got {}",
                    coords.len()
                ));
            }
            return None;
        }
    };
    if coords.len() != expected {
        return Some(format!(
            "{} needs {} coords, got {}",
            shape.name(),
            expected,
            coords.len()
        ));
    }
    None
}

fn check_lookup_table(
    d: &VariableDeclaration,
    table: &LookupTable,
    path: &str,
    items: &mut Vec<ValidationItem>,
) {
    if d.cardinality != Cardinality::Single {
        items.push(ValidationItem::error(
            PASS,
            path,
            format!(
                "lookup tables require a single cardinality outcome, '{}' is {}",
                d.identifier, d.cardinality
            ),
        ));
    }
    if let LookupTable::Interpolation(_) = table {
        if d.base_type.is_some_and(|bt| !bt.is_numeric()) {
            items.push(ValidationItem::error(
                PASS,
                path,
                "interpolationTable requires a numeric outcome",
            ));
        }
    }

    let (field, sources) = match table {
        LookupTable::Match(_) => ("matchTable", table.source_values()),
        LookupTable::Interpolation(_) => ("interpolationTable", table.source_values()),
    };
    let table_path = child(path, field);
    for (i, source) in sources.iter().enumerate() {
        if sources[..i].contains(source) {
            items.push(ValidationItem::warning(
                PASS,
                indexed(&table_path, "entries", i),
                format!("duplicate sourceValue {}", source),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coords_by_shape() {
        assert_eq!(coords_problem(Shape::Rect, &[0, 0, 10, 10]), None);
        assert_eq!(coords_problem(Shape::Circle, &[5, 5, 2]), None);
        assert_eq!(coords_problem(Shape::Poly, &[0, 0, 10, 0, 10, 10]), None);
        assert_eq!(coords_problem(Shape::Default, &[]), None);
        assert_eq!(
            coords_problem(Shape::Circle, &[5, 5]),
            Some("circle needs 3 coords, got 2".to_string())
        );
        assert!(coords_problem(Shape::Poly, &[0, 0, 10, 0, 10]).is_some());
    }
}
