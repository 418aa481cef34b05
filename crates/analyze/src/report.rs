//! ValidationResult -- diagnostics collected from every validation pass.
//!
//! Items are appended in the order the passes find them and never
//! removed. Each carries the pass that raised it and a slash-separated
//! path to the offending node, so callers can view them per severity or
//! per subtree.

use serde::Serialize;
use std::fmt;

/// Severity level of a validation item.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn name(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

/// One diagnostic raised against a node of the package.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidationItem {
    /// Pass that raised the item ("load", "v1" ... "v4").
    pub pass: String,
    pub severity: Severity,
    /// e.g. `item1/responseProcessing[0]/responseIf/condition/sum`
    pub path: String,
    pub message: String,
}

impl ValidationItem {
    pub fn error(pass: &str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(pass, Severity::Error, path, message)
    }

    pub fn warning(pass: &str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(pass, Severity::Warning, path, message)
    }

    pub fn info(pass: &str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(pass, Severity::Info, path, message)
    }

    fn new(
        pass: &str,
        severity: Severity,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ValidationItem {
            pass: pass.to_string(),
            severity,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether this item sits at `prefix` or anywhere below it.
    pub fn is_under(&self, prefix: &str) -> bool {
        match self.path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('['),
            None => false,
        }
    }
}

impl fmt::Display for ValidationItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.severity.name(), self.path, self.message)
    }
}

/// Everything the validation passes found in a package.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    pub passes_run: Vec<String>,
    pub items: Vec<ValidationItem>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pass and append its items.
    pub fn record(&mut self, pass: &str, items: Vec<ValidationItem>) {
        self.passes_run.push(pass.to_string());
        self.items.extend(items);
    }

    pub fn push(&mut self, item: ValidationItem) {
        self.items.push(item);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.items.iter().any(|i| i.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationItem> {
        self.of_severity(Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationItem> {
        self.of_severity(Severity::Warning)
    }

    pub fn infos(&self) -> impl Iterator<Item = &ValidationItem> {
        self.of_severity(Severity::Info)
    }

    fn of_severity(&self, severity: Severity) -> impl Iterator<Item = &ValidationItem> {
        self.items.iter().filter(move |i| i.severity == severity)
    }

    /// Items raised against the node at `prefix` or its descendants.
    pub fn for_path<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a ValidationItem> {
        self.items.iter().filter(move |i| i.is_under(prefix))
    }

    /// (errors, warnings, infos)
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.errors().count(),
            self.warnings().count(),
            self.infos().count(),
        )
    }
}
