//! QTI assessment runtime -- loads items and tests from package JSON,
//! runs template, response and outcome processing, and records results.
//!
//! Definitions ([`AssessmentItem`], [`AssessmentTest`]) are immutable and
//! shared behind `Arc`. All mutable state lives in the session
//! controllers: [`ItemSessionController`] for a standalone item and
//! [`TestSessionController`] for a planned test and its item sessions.

pub mod cas;
pub mod config;
pub mod context;
pub mod expression;
pub mod geometry;
pub mod listener;
pub mod mapping;
pub mod numeric;
pub mod result;
pub mod rules;
pub mod runtime;
pub mod session;
pub mod test_session;
pub mod timing;
pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use cas::{CasError, CasFailurePolicy, EvaluationService};
pub use config::{ConfigError, EngineSettings};
pub use context::{NotificationLevel, RuntimeNotification, RuntimeNotifications};
pub use listener::{LifecycleEvent, LifecycleListener};
pub use result::{AssessmentResult, ItemResult, ResultVariable, SessionStatus, TestResult};
pub use session::{ItemSessionController, ItemSessionPhase, ItemSessionState, Submission};
pub use test_session::{TestPlan, TestSessionController, TestSessionState};
pub use types::{AssessmentItem, AssessmentTest, EvalError, Value};

/// Every item and test of a package, built and ready for sessions.
#[derive(Debug, Clone)]
pub struct AssessmentPackage {
    pub id: String,
    pub items: BTreeMap<String, Arc<AssessmentItem>>,
    pub tests: BTreeMap<String, Arc<AssessmentTest>>,
}

impl AssessmentPackage {
    /// Build every document of an interchange package.
    pub fn from_interchange(package: &serde_json::Value) -> Result<Self, EvalError> {
        let package = qti_interchange::from_interchange(package)?;
        let mut items = BTreeMap::new();
        for doc in package.items() {
            items.insert(
                doc.identifier.clone(),
                Arc::new(AssessmentItem::from_document(doc)?),
            );
        }
        let mut tests = BTreeMap::new();
        for doc in package.tests() {
            tests.insert(
                doc.identifier.clone(),
                Arc::new(AssessmentTest::from_document(doc)?),
            );
        }
        tracing::debug!(package = %package.id, items = items.len(), tests = tests.len(), "package loaded");
        Ok(AssessmentPackage {
            id: package.id,
            items,
            tests,
        })
    }

    pub fn item(&self, identifier: &str) -> Option<&Arc<AssessmentItem>> {
        self.items.get(identifier)
    }

    pub fn test(&self, identifier: &str) -> Option<&Arc<AssessmentTest>> {
        self.tests.get(identifier)
    }

    /// A fresh, uninitialised session on a standalone item.
    pub fn item_session(
        &self,
        identifier: &str,
        settings: EngineSettings,
    ) -> Result<ItemSessionController, EvalError> {
        let item = self.item(identifier).ok_or_else(|| unknown_document(identifier))?;
        Ok(ItemSessionController::new(Arc::clone(item), settings))
    }

    /// A fresh, uninitialised session on a test. Item refs whose href is
    /// not in the package are left out of the plan with a warning.
    pub fn test_session(
        &self,
        identifier: &str,
        settings: EngineSettings,
    ) -> Result<TestSessionController, EvalError> {
        let test = self.test(identifier).ok_or_else(|| unknown_document(identifier))?;
        Ok(TestSessionController::new(
            Arc::clone(test),
            &self.items,
            settings,
        ))
    }
}

fn unknown_document(identifier: &str) -> EvalError {
    EvalError::UnknownDocument {
        identifier: identifier.to_string(),
    }
}
