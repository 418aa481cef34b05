//! Builds the item and test definitions the validation passes walk.
//!
//! Documents are built with the runtime's own constructors, so anything
//! the runtime would refuse to load (unknown operator names, malformed
//! values) is rejected here once and reported as a `load` error. The
//! passes only ever see documents that built.

use std::collections::BTreeSet;

use qti_eval::types::{AssessmentItem, AssessmentTest, VariableDeclaration};
use qti_eval::EvalError;
use qti_interchange::{InterchangeError, QtiDocument};

/// Error type for validation entry points.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    /// The package envelope itself could not be read.
    #[error(transparent)]
    Interchange(#[from] InterchangeError),
    /// A pass name given to `validate_selected` is not known.
    #[error("unknown validation pass '{0}'")]
    UnknownPass(String),
}

/// A document that failed to build.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedDocument {
    pub identifier: String,
    pub error: EvalError,
}

/// A built document, borrowed from the package.
#[derive(Debug, Clone, Copy)]
pub enum Document<'a> {
    Item(&'a AssessmentItem),
    Test(&'a AssessmentTest),
}

impl<'a> Document<'a> {
    pub fn identifier(&self) -> &'a str {
        match self {
            Document::Item(item) => &item.identifier,
            Document::Test(test) => &test.identifier,
        }
    }

    pub fn is_test(&self) -> bool {
        matches!(self, Document::Test(_))
    }
}

/// Outcome of resolving a variable reference inside a document.
#[derive(Debug, Clone, Copy)]
pub enum Lookup<'a> {
    Declared(&'a VariableDeclaration),
    /// A dotted reference through an item ref whose item did not build or
    /// is not in the package. The item ref itself is reported elsewhere.
    Unresolved,
    Undeclared,
}

/// Every document of a package, built for validation.
#[derive(Debug, Clone)]
pub struct ValidationPackage {
    pub id: String,
    pub items: Vec<AssessmentItem>,
    pub tests: Vec<AssessmentTest>,
    pub rejected: Vec<RejectedDocument>,
    item_identifiers: BTreeSet<String>,
}

impl ValidationPackage {
    /// Build every document of an interchange package. Only an unreadable
    /// envelope is an error; documents that do not build are collected in
    /// `rejected`.
    pub fn from_interchange(package: &serde_json::Value) -> Result<Self, AnalysisError> {
        let package = qti_interchange::from_interchange(package)?;
        let mut items = Vec::new();
        let mut tests = Vec::new();
        let mut rejected = Vec::new();
        let mut item_identifiers = BTreeSet::new();

        for doc in &package.documents {
            let built = match doc {
                QtiDocument::Item(d) => {
                    item_identifiers.insert(d.identifier.clone());
                    AssessmentItem::from_document(d).map(|item| items.push(item))
                }
                QtiDocument::Test(d) => AssessmentTest::from_document(d).map(|test| tests.push(test)),
            };
            if let Err(error) = built {
                tracing::debug!(document = doc.identifier(), %error, "document rejected");
                rejected.push(RejectedDocument {
                    identifier: doc.identifier().to_string(),
                    error,
                });
            }
        }

        Ok(ValidationPackage {
            id: package.id,
            items,
            tests,
            rejected,
            item_identifiers,
        })
    }

    pub fn item(&self, identifier: &str) -> Option<&AssessmentItem> {
        self.items.iter().find(|i| i.identifier == identifier)
    }

    /// Whether the package holds an item document with this identifier,
    /// whether or not it built.
    pub fn has_item_document(&self, identifier: &str) -> bool {
        self.item_identifiers.contains(identifier)
    }

    /// Built documents: items first, then tests, each in package order.
    pub fn documents(&self) -> impl Iterator<Item = Document<'_>> {
        self.items
            .iter()
            .map(Document::Item)
            .chain(self.tests.iter().map(Document::Test))
    }

    /// Resolve a variable reference as written inside `doc`.
    ///
    /// Inside tests, `ref.VAR` and `ref.N.VAR` resolve through the item ref
    /// named `ref` to the declarations of the item it points at.
    pub fn lookup<'a>(&'a self, doc: Document<'a>, identifier: &str) -> Lookup<'a> {
        let found = |d: Option<&'a VariableDeclaration>| match d {
            Some(d) => Lookup::Declared(d),
            None => Lookup::Undeclared,
        };
        match doc {
            Document::Item(item) => found(item.declaration(identifier)),
            Document::Test(test) => {
                let Some((item_ref, rest)) = identifier.split_once('.') else {
                    return found(test.declaration(identifier));
                };
                let variable = match rest.split_once('.') {
                    Some((instance, variable)) if instance.parse::<usize>().is_ok() => variable,
                    _ => rest,
                };
                let Some(item_ref) = test.item_ref(item_ref) else {
                    return Lookup::Undeclared;
                };
                match self.item(&item_ref.href) {
                    Some(item) => found(item.declaration(variable)),
                    None => Lookup::Unresolved,
                }
            }
        }
    }
}
