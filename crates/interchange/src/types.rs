//! Typed envelopes for the QTI package JSON format.
//!
//! Only the fields shared by every consumer are lifted into struct
//! fields. Declaration lists, processing rule lists and the test part
//! tree are kept as raw JSON so that the evaluator and the validator can
//! walk them with their own representations.

use serde::{Deserialize, Serialize};

/// Location in the authored source the document was converted from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provenance {
    pub file: String,
    pub line: u64,
}

/// Top-level package holding every item and test document.
#[derive(Debug, Clone)]
pub struct QtiPackage {
    /// Package identifier.
    pub id: String,
    /// QTI version the content targets (e.g. "2.1").
    pub qti_version: String,
    /// All documents in the package, in declaration order.
    pub documents: Vec<QtiDocument>,
}

impl QtiPackage {
    /// All assessment item documents.
    pub fn items(&self) -> impl Iterator<Item = &ItemDocument> {
        self.documents.iter().filter_map(|d| match d {
            QtiDocument::Item(item) => Some(item),
            QtiDocument::Test(_) => None,
        })
    }

    /// All assessment test documents.
    pub fn tests(&self) -> impl Iterator<Item = &TestDocument> {
        self.documents.iter().filter_map(|d| match d {
            QtiDocument::Test(test) => Some(test),
            QtiDocument::Item(_) => None,
        })
    }

    /// Look up an item document by identifier (item refs use this as their href).
    pub fn item(&self, identifier: &str) -> Option<&ItemDocument> {
        self.items().find(|i| i.identifier == identifier)
    }

    /// Look up a test document by identifier.
    pub fn test(&self, identifier: &str) -> Option<&TestDocument> {
        self.tests().find(|t| t.identifier == identifier)
    }
}

/// A single document in the package, dispatched by `kind`.
#[derive(Debug, Clone)]
pub enum QtiDocument {
    Item(ItemDocument),
    Test(TestDocument),
}

impl QtiDocument {
    pub fn identifier(&self) -> &str {
        match self {
            QtiDocument::Item(i) => &i.identifier,
            QtiDocument::Test(t) => &t.identifier,
        }
    }
}

// ── Item ────────────────────────────────────────────────────────────

/// An `assessmentItem` document.
#[derive(Debug, Clone)]
pub struct ItemDocument {
    pub identifier: String,
    pub title: Option<String>,
    pub adaptive: bool,
    pub time_dependent: bool,
    pub response_declarations: Vec<serde_json::Value>,
    pub outcome_declarations: Vec<serde_json::Value>,
    pub template_declarations: Vec<serde_json::Value>,
    pub template_processing: Vec<serde_json::Value>,
    pub response_processing: Vec<serde_json::Value>,
    /// End-attempt controls bound to boolean response variables.
    pub end_attempts: Vec<EndAttemptControl>,
    pub provenance: Option<Provenance>,
}

/// An end-attempt control: submitting with this response set to true ends
/// the attempt, optionally without counting it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndAttemptControl {
    #[serde(rename = "responseIdentifier")]
    pub response_identifier: String,
    #[serde(rename = "countAttempt", default = "counts_by_default")]
    pub count_attempt: bool,
}

fn counts_by_default() -> bool {
    true
}

// ── Test ────────────────────────────────────────────────────────────

/// An `assessmentTest` document.
#[derive(Debug, Clone)]
pub struct TestDocument {
    pub identifier: String,
    pub title: Option<String>,
    pub outcome_declarations: Vec<serde_json::Value>,
    pub time_limits: Option<serde_json::Value>,
    pub test_parts: Vec<serde_json::Value>,
    pub outcome_processing: Vec<serde_json::Value>,
    pub test_feedbacks: Vec<serde_json::Value>,
    pub provenance: Option<Provenance>,
}
