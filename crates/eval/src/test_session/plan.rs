//! Test planning: selection and ordering of section children.
//!
//! The plan is a forest with one root per test part. Invisible sections
//! do not appear in it; their children are spliced into the parent. An
//! item ref may appear any number of times (selection with replacement),
//! and every occurrence carries an instance number, counted from 1 per
//! identifier across the whole plan.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::context::RuntimeNotifications;
use crate::types::{AssessmentItemRef, AssessmentSection, AssessmentTest, SectionPart};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanNodeKind {
    TestPart,
    Section,
    ItemRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPlanNode {
    pub kind: PlanNodeKind,
    pub identifier: String,
    /// 1-based occurrence number of this identifier in the plan.
    pub instance: usize,
    pub children: Vec<TestPlanNode>,
}

impl TestPlanNode {
    fn walk<'a>(&'a self, out: &mut Vec<&'a TestPlanNode>) {
        out.push(self);
        for child in &self.children {
            child.walk(out);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestPlan {
    pub test_parts: Vec<TestPlanNode>,
}

impl TestPlan {
    /// Item-ref nodes in plan order, each with its test part index.
    pub fn item_refs(&self) -> Vec<(usize, &TestPlanNode)> {
        let mut out = Vec::new();
        for (index, part) in self.test_parts.iter().enumerate() {
            let mut nodes = Vec::new();
            part.walk(&mut nodes);
            out.extend(
                nodes
                    .into_iter()
                    .filter(|n| n.kind == PlanNodeKind::ItemRef)
                    .map(|n| (index, n)),
            );
        }
        out
    }

    /// Identifiers of the sections that made it into the plan, each once.
    pub fn section_identifiers(&self) -> Vec<&str> {
        let mut nodes = Vec::new();
        for part in &self.test_parts {
            part.walk(&mut nodes);
        }
        let mut out: Vec<&str> = Vec::new();
        for node in nodes.into_iter().filter(|n| n.kind == PlanNodeKind::Section) {
            if !out.contains(&node.identifier.as_str()) {
                out.push(&node.identifier);
            }
        }
        out
    }

    pub fn item_count(&self) -> usize {
        self.item_refs().len()
    }
}

// ──────────────────────────────────────────────
// Planner
// ──────────────────────────────────────────────

/// A section part chosen for the plan, before instance numbering.
enum Built<'a> {
    Section(&'a AssessmentSection, Vec<Built<'a>>),
    ItemRef(&'a AssessmentItemRef),
}

impl Built<'_> {
    fn fixed(&self) -> bool {
        match self {
            Built::Section(s, _) => s.fixed,
            Built::ItemRef(r) => r.fixed,
        }
    }

    /// Invisible sections matching `keep_together` dissolve into their
    /// children.
    fn dissolves(&self, keep_together: bool) -> bool {
        matches!(self, Built::Section(s, _) if !s.visible && s.keep_together == keep_together)
    }
}

struct Planner<'a, 'r, F> {
    test: &'a AssessmentTest,
    resolves: F,
    rng: &'r mut StdRng,
    notifications: &'r mut RuntimeNotifications,
}

/// Build the plan for a test.
///
/// `resolves` tells whether an item ref points at a loadable item; refs
/// that do not are dropped with a warning.
pub fn plan(
    test: &AssessmentTest,
    resolves: impl Fn(&AssessmentItemRef) -> bool,
    rng: &mut StdRng,
    notifications: &mut RuntimeNotifications,
) -> TestPlan {
    let mut planner = Planner {
        test,
        resolves,
        rng,
        notifications,
    };
    let mut instances = BTreeMap::new();
    let mut test_parts = Vec::with_capacity(test.test_parts.len());
    for part in &test.test_parts {
        let mut children = Vec::new();
        for section in &part.sections {
            let built = planner.section(section);
            if section.visible {
                children.push(built);
            } else if let Built::Section(_, grandchildren) = built {
                children.extend(grandchildren);
            }
        }
        test_parts.push(TestPlanNode {
            kind: PlanNodeKind::TestPart,
            identifier: part.identifier.clone(),
            instance: next_instance(&mut instances, &part.identifier),
            children: record(children, &mut instances),
        });
    }
    let plan = TestPlan { test_parts };
    tracing::debug!(test = %test.identifier, items = plan.item_count(), "test plan built");
    plan
}

fn next_instance(instances: &mut BTreeMap<String, usize>, identifier: &str) -> usize {
    let n = instances.entry(identifier.to_string()).or_insert(0);
    *n += 1;
    *n
}

fn record(built: Vec<Built<'_>>, instances: &mut BTreeMap<String, usize>) -> Vec<TestPlanNode> {
    built
        .into_iter()
        .map(|b| match b {
            Built::Section(section, children) => {
                let instance = next_instance(instances, &section.identifier);
                TestPlanNode {
                    kind: PlanNodeKind::Section,
                    identifier: section.identifier.clone(),
                    instance,
                    children: record(children, instances),
                }
            }
            Built::ItemRef(item_ref) => TestPlanNode {
                kind: PlanNodeKind::ItemRef,
                identifier: item_ref.identifier.clone(),
                instance: next_instance(instances, &item_ref.identifier),
                children: Vec::new(),
            },
        })
        .collect()
}

impl<'a, F: Fn(&AssessmentItemRef) -> bool> Planner<'a, '_, F> {
    fn section(&mut self, section: &'a AssessmentSection) -> Built<'a> {
        tracing::trace!(section = %section.identifier, "planning section");
        let selected: Vec<&'a SectionPart> = match section.selection {
            Some(_) => self.select(section),
            None => section.parts.iter().collect(),
        };

        let mut children = Vec::with_capacity(selected.len());
        for part in selected {
            match part {
                SectionPart::Section(s) => children.push(self.section(s)),
                SectionPart::ItemRef(r) => {
                    if (self.resolves)(r) {
                        children.push(Built::ItemRef(r));
                    } else {
                        self.notifications.warn(
                            &self.test.identifier,
                            format!(
                                "item ref '{}' does not resolve to an item and is dropped from the test plan",
                                r.identifier
                            ),
                        );
                    }
                }
            }
        }

        if section.ordering.map_or(false, |o| o.shuffle) {
            children = self.shuffle(children);
        }

        let mut flattened = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Built::Section(s, grandchildren) if !s.visible => flattened.extend(grandchildren),
                other => flattened.push(other),
            }
        }
        Built::Section(section, flattened)
    }

    /// Pick the section children named by its selection, in document order.
    fn select(&mut self, section: &'a AssessmentSection) -> Vec<&'a SectionPart> {
        let children = &section.parts;
        let Some(selection) = section.selection else {
            return children.iter().collect();
        };
        let mut requested = selection.select;
        if requested == 0 {
            return Vec::new();
        }
        if !selection.with_replacement && requested > children.len() {
            self.notifications.warn(
                &self.test.identifier,
                format!(
                    "section '{}' selects {} of {} children without replacement; all children are selected",
                    section.identifier,
                    requested,
                    children.len()
                ),
            );
            return children.iter().collect();
        }

        let mut per_child: Vec<usize> = children.iter().map(|c| usize::from(c.required())).collect();
        let required: usize = per_child.iter().sum();
        if required > requested {
            self.notifications.warn(
                &self.test.identifier,
                format!(
                    "section '{}' selects {} children but {} are required; all required children are selected",
                    section.identifier, requested, required
                ),
            );
            requested = required;
        }

        let remaining = requested - required;
        if selection.with_replacement {
            for _ in 0..remaining {
                let index = self.rng.gen_range(0..children.len());
                per_child[index] += 1;
            }
        } else {
            let mut unselected: Vec<usize> = (0..children.len()).filter(|&i| per_child[i] == 0).collect();
            for _ in 0..remaining {
                if unselected.is_empty() {
                    break;
                }
                let pick = self.rng.gen_range(0..unselected.len());
                per_child[unselected.remove(pick)] += 1;
            }
        }

        children
            .iter()
            .zip(per_child)
            .flat_map(|(child, n)| std::iter::repeat(child).take(n))
            .collect()
    }

    /// Shuffle children that are not fixed. Invisible sections that need
    /// not stay together join the pool child by child.
    fn shuffle(&mut self, children: Vec<Built<'a>>) -> Vec<Built<'a>> {
        let mut pool = Vec::with_capacity(children.len());
        for child in children {
            if child.dissolves(false) {
                if let Built::Section(_, grandchildren) = child {
                    pool.extend(grandchildren);
                }
            } else {
                pool.push(child);
            }
        }

        let slots: Vec<usize> = (0..pool.len()).filter(|&i| !pool[i].fixed()).collect();
        let mut order = slots.clone();
        order.shuffle(&mut *self.rng);

        let mut taken: Vec<Option<Built<'a>>> = pool.into_iter().map(Some).collect();
        let mut arranged: Vec<Option<Built<'a>>> = (0..taken.len()).map(|_| None).collect();
        for (i, slot) in arranged.iter_mut().enumerate() {
            if !slots.contains(&i) {
                *slot = taken[i].take();
            }
        }
        for (slot, from) in slots.iter().zip(order) {
            arranged[*slot] = taken[from].take();
        }

        let mut out = Vec::with_capacity(arranged.len());
        for built in arranged.into_iter().flatten() {
            if built.dissolves(true) {
                if let Built::Section(_, grandchildren) = built {
                    out.extend(grandchildren);
                }
            } else {
                out.push(built);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qti_interchange::from_interchange;
    use rand::SeedableRng;
    use serde_json::json;

    fn item_ref(id: &str, extra: serde_json::Value) -> serde_json::Value {
        let mut v = json!({"kind": "assessmentItemRef", "identifier": id});
        if let (Some(obj), Some(more)) = (v.as_object_mut(), extra.as_object()) {
            obj.extend(more.clone());
        }
        v
    }

    fn test_with(sections: serde_json::Value) -> AssessmentTest {
        let package = json!({"id": "p", "documents": [{
            "kind": "AssessmentTest",
            "identifier": "t",
            "testParts": [{"identifier": "P1", "assessmentSections": sections}]
        }]});
        let pkg = from_interchange(&package).unwrap();
        let test = AssessmentTest::from_document(pkg.tests().next().unwrap()).unwrap();
        test
    }

    fn planned(test: &AssessmentTest, seed: u64) -> (TestPlan, RuntimeNotifications) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut notes = RuntimeNotifications::new();
        let plan = plan(test, |r| r.identifier != "missing", &mut rng, &mut notes);
        (plan, notes)
    }

    fn item_ids(plan: &TestPlan) -> Vec<String> {
        plan.item_refs()
            .into_iter()
            .map(|(_, n)| format!("{}#{}", n.identifier, n.instance))
            .collect()
    }

    #[test]
    fn plain_sections_keep_document_order() {
        let test = test_with(json!([{
            "identifier": "S1",
            "sectionParts": [item_ref("a", json!({})), item_ref("b", json!({}))]
        }, {
            "identifier": "S2",
            "visible": false,
            "sectionParts": [item_ref("c", json!({}))]
        }]));
        let (plan, notes) = planned(&test, 1);
        assert_eq!(item_ids(&plan), vec!["a#1", "b#1", "c#1"]);
        // S2 is invisible and does not appear.
        assert_eq!(plan.section_identifiers(), vec!["S1"]);
        assert!(notes.is_empty());
    }

    #[test]
    fn selection_includes_required_children() {
        let test = test_with(json!([{
            "identifier": "S",
            "selection": {"select": 2},
            "sectionParts": [
                item_ref("a", json!({})),
                item_ref("b", json!({"required": true})),
                item_ref("c", json!({})),
                item_ref("d", json!({}))
            ]
        }]));
        for seed in 0..20 {
            let (plan, _) = planned(&test, seed);
            let ids = item_ids(&plan);
            assert_eq!(ids.len(), 2);
            assert!(ids.contains(&"b#1".to_string()));
        }
    }

    #[test]
    fn selection_with_replacement_numbers_instances() {
        let test = test_with(json!([{
            "identifier": "S",
            "selection": {"select": 3, "withReplacement": true},
            "sectionParts": [item_ref("a", json!({}))]
        }]));
        let (plan, _) = planned(&test, 3);
        assert_eq!(item_ids(&plan), vec!["a#1", "a#2", "a#3"]);
    }

    #[test]
    fn oversized_selection_takes_everything() {
        let test = test_with(json!([{
            "identifier": "S",
            "selection": {"select": 5},
            "sectionParts": [item_ref("a", json!({})), item_ref("b", json!({}))]
        }]));
        let (plan, notes) = planned(&test, 3);
        assert_eq!(item_ids(&plan), vec!["a#1", "b#1"]);
        assert_eq!(notes.warnings().count(), 1);
    }

    #[test]
    fn shuffle_leaves_fixed_children_in_place() {
        let test = test_with(json!([{
            "identifier": "S",
            "ordering": {"shuffle": true},
            "sectionParts": [
                item_ref("first", json!({"fixed": true})),
                item_ref("a", json!({})),
                item_ref("b", json!({})),
                item_ref("c", json!({})),
                item_ref("last", json!({"fixed": true}))
            ]
        }]));
        let mut orders = std::collections::BTreeSet::new();
        for seed in 0..30 {
            let ids = item_ids(&planned(&test, seed).0);
            assert_eq!(ids.first().map(String::as_str), Some("first#1"));
            assert_eq!(ids.last().map(String::as_str), Some("last#1"));
            orders.insert(ids);
        }
        assert!(orders.len() > 1);
    }

    #[test]
    fn kept_together_invisible_section_moves_as_a_block() {
        let test = test_with(json!([{
            "identifier": "S",
            "ordering": {"shuffle": true},
            "sectionParts": [
                item_ref("a", json!({})),
                {"kind": "assessmentSection", "identifier": "G", "visible": false,
                 "sectionParts": [item_ref("g1", json!({})), item_ref("g2", json!({}))]},
                item_ref("b", json!({}))
            ]
        }]));
        for seed in 0..20 {
            let ids = item_ids(&planned(&test, seed).0);
            let g1 = ids.iter().position(|i| i == "g1#1").unwrap();
            assert_eq!(ids[g1 + 1], "g2#1");
        }
    }

    #[test]
    fn unresolved_item_refs_are_dropped() {
        let test = test_with(json!([{
            "identifier": "S",
            "sectionParts": [item_ref("a", json!({})), item_ref("missing", json!({}))]
        }]));
        let (plan, notes) = planned(&test, 1);
        assert_eq!(item_ids(&plan), vec!["a#1"]);
        assert!(notes.warnings().any(|n| n.message.contains("'missing'")));
    }
}
