//! Evaluation context: the variable scope an expression or rule runs
//! against, plus randomness, notifications and the optional CAS hook.

use rand::rngs::StdRng;
use serde::Serialize;

use crate::cas::{CasFailurePolicy, EvaluationService};
use crate::types::{EvalError, ItemSubset, Value, VariableDeclaration};

// ──────────────────────────────────────────────
// Runtime notifications
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// A notice raised while running, kept on the session for callers that
/// do not install a tracing subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeNotification {
    pub level: NotificationLevel,
    /// Item or test identifier the notice came from.
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeNotifications {
    items: Vec<RuntimeNotification>,
}

impl RuntimeNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, level: NotificationLevel, source: &str, message: String) {
        self.items.push(RuntimeNotification {
            level,
            source: source.to_string(),
            message,
        });
    }

    pub fn info(&mut self, source: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(source, "{}", message);
        self.record(NotificationLevel::Info, source, message);
    }

    pub fn warn(&mut self, source: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(source, "{}", message);
        self.record(NotificationLevel::Warning, source, message);
    }

    pub fn error(&mut self, source: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(source, "{}", message);
        self.record(NotificationLevel::Error, source, message);
    }

    pub fn all(&self) -> &[RuntimeNotification] {
        &self.items
    }

    pub fn warnings(&self) -> impl Iterator<Item = &RuntimeNotification> {
        self.items
            .iter()
            .filter(|n| n.level == NotificationLevel::Warning)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: RuntimeNotifications) {
        self.items.extend(other.items);
    }
}

// ──────────────────────────────────────────────
// Scopes
// ──────────────────────────────────────────────

/// Read access to one item instance in a test, for item-subset
/// expressions.
pub trait ItemView {
    fn item_ref_identifier(&self) -> &str;
    fn is_presented(&self) -> bool;
    fn is_responded(&self) -> bool;
    /// `None` when some response has no correct response declared.
    fn is_correct(&self) -> Option<bool>;
    fn is_incorrect(&self) -> bool;
    fn declaration(&self, identifier: &str) -> Option<&VariableDeclaration>;
    fn value(&self, identifier: &str) -> Option<Value>;
    /// Weight defined on the item ref; `None` means unweighted.
    fn weight(&self, weight_identifier: &str) -> Option<f64>;
}

/// Result of resolving a dotted `itemRef.VAR` (or `itemRef.N.VAR`)
/// reference.
#[derive(Debug, Clone, PartialEq)]
pub enum DottedValue {
    Found(Value),
    /// The item ref was selected several times; the value comes from the
    /// first instance.
    FirstOf { value: Value, instances: usize },
    /// No selected instance matches.
    NoInstance,
    /// The item ref exists but does not declare the variable.
    UnknownVariable,
}

/// Variables an expression or rule can see and write.
///
/// Reads of undeclared identifiers return `None`; writes to them fail with
/// `EvalError::UnknownVariable`.
pub trait VariableScope {
    /// Item or test identifier, used to attribute notifications.
    fn source(&self) -> &str;

    fn declaration(&self, identifier: &str) -> Option<&VariableDeclaration>;

    fn value(&self, identifier: &str) -> Option<Value>;

    fn set_value(&mut self, identifier: &str, value: Value) -> Result<(), EvalError>;

    /// Effective correct response (an override or the declared one).
    fn correct_response(&self, identifier: &str) -> Option<Value>;

    /// Effective default value (an override or the declared one).
    fn default_value(&self, identifier: &str) -> Option<Value>;

    fn set_correct_response(&mut self, identifier: &str, value: Value) -> Result<(), EvalError>;

    fn set_default_value(&mut self, identifier: &str, value: Value) -> Result<(), EvalError>;

    /// Whether the scope is a test (item subsets and dotted references
    /// only resolve there).
    fn is_test(&self) -> bool {
        false
    }

    /// Item instances matching an item-subset filter.
    fn item_subset(&self, _subset: &ItemSubset) -> Vec<&dyn ItemView> {
        Vec::new()
    }

    /// Number of selected item instances, ignoring every filter.
    fn selected_item_count(&self) -> usize {
        0
    }

    /// Value of `identifier` in an instance of `item_ref`; `instance` is
    /// 1-based and `None` means "the only instance".
    fn dotted_value(
        &self,
        _item_ref: &str,
        _instance: Option<usize>,
        _identifier: &str,
    ) -> DottedValue {
        DottedValue::UnknownVariable
    }

    /// Weight defined on an item ref.
    fn item_ref_weight(&self, _item_ref: &str, _weight_identifier: &str) -> Option<f64> {
        None
    }
}

/// Everything an evaluation needs, borrowed for its duration.
pub struct EvalContext<'a> {
    pub scope: &'a mut dyn VariableScope,
    pub rng: &'a mut StdRng,
    pub notifications: &'a mut RuntimeNotifications,
    pub cas: Option<&'a dyn EvaluationService>,
    pub cas_policy: CasFailurePolicy,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        scope: &'a mut dyn VariableScope,
        rng: &'a mut StdRng,
        notifications: &'a mut RuntimeNotifications,
    ) -> Self {
        EvalContext {
            scope,
            rng,
            notifications,
            cas: None,
            cas_policy: CasFailurePolicy::NullWithWarning,
        }
    }

    pub fn with_cas(
        mut self,
        cas: Option<&'a dyn EvaluationService>,
        policy: CasFailurePolicy,
    ) -> Self {
        self.cas = cas;
        self.cas_policy = policy;
        self
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let source = self.scope.source().to_string();
        self.notifications.warn(&source, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let source = self.scope.source().to_string();
        self.notifications.error(&source, message);
    }
}

/// A plain in-memory scope for unit tests.
#[cfg(test)]
pub(crate) mod test_scope {
    use std::collections::BTreeMap;

    use super::VariableScope;
    use crate::types::declarations::parse_declaration;
    use crate::types::{EvalError, Value, VariableDeclaration, VariableKind};

    #[derive(Debug, Default)]
    pub(crate) struct MapScope {
        pub declarations: Vec<VariableDeclaration>,
        pub values: BTreeMap<String, Value>,
        pub correct: BTreeMap<String, Value>,
        pub defaults: BTreeMap<String, Value>,
    }

    impl MapScope {
        pub fn declare(mut self, kind: VariableKind, decl: serde_json::Value) -> Self {
            let d = parse_declaration(&decl, kind).unwrap();
            self.values.insert(d.identifier.clone(), d.initial_value());
            self.declarations.push(d);
            self
        }

        pub fn with(mut self, id: &str, v: Value) -> Self {
            self.values.insert(id.to_string(), v);
            self
        }

        pub fn get(&self, id: &str) -> Value {
            self.values.get(id).cloned().unwrap_or(Value::Null)
        }
    }

    impl VariableScope for MapScope {
        fn source(&self) -> &str {
            "scope"
        }

        fn declaration(&self, identifier: &str) -> Option<&VariableDeclaration> {
            self.declarations.iter().find(|d| d.identifier == identifier)
        }

        fn value(&self, identifier: &str) -> Option<Value> {
            self.declaration(identifier)?;
            Some(self.get(identifier))
        }

        fn set_value(&mut self, identifier: &str, value: Value) -> Result<(), EvalError> {
            if self.declaration(identifier).is_none() {
                return Err(EvalError::UnknownVariable {
                    identifier: identifier.to_string(),
                });
            }
            self.values.insert(identifier.to_string(), value);
            Ok(())
        }

        fn correct_response(&self, identifier: &str) -> Option<Value> {
            let decl = self.declaration(identifier)?;
            Some(
                self.correct
                    .get(identifier)
                    .or(decl.correct_response())
                    .cloned()
                    .unwrap_or(Value::Null),
            )
        }

        fn default_value(&self, identifier: &str) -> Option<Value> {
            let decl = self.declaration(identifier)?;
            Some(
                self.defaults
                    .get(identifier)
                    .cloned()
                    .unwrap_or_else(|| decl.initial_value()),
            )
        }

        fn set_correct_response(&mut self, identifier: &str, value: Value) -> Result<(), EvalError> {
            self.correct.insert(identifier.to_string(), value);
            Ok(())
        }

        fn set_default_value(&mut self, identifier: &str, value: Value) -> Result<(), EvalError> {
            self.defaults.insert(identifier.to_string(), value);
            Ok(())
        }
    }
}
