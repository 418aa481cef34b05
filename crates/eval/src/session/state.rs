//! Mutable per-candidate state of one item session.

use std::collections::{BTreeMap, BTreeSet};

use time::OffsetDateTime;

use crate::timing::Timer;
use crate::types::Value;

/// Where an item session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemSessionPhase {
    NotAttempted,
    Initialized,
    Interacting,
    Suspended,
    Finished,
}

/// Variable bindings and lifecycle flags of an item session.
///
/// Identifiers are unique across variable kinds within an item, so all
/// bindings share one map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemSessionState {
    pub initialized: bool,
    pub presented: bool,
    pub responded: bool,
    pub skipped: bool,
    pub timed_out: bool,
    pub suspended: bool,
    pub finished: bool,
    pub exited: bool,
    /// Responses bound but not yet processed.
    pub pending_submission: bool,
    pub entry_time: Option<OffsetDateTime>,
    pub end_time: Option<OffsetDateTime>,
    pub duration: Timer,
    pub values: BTreeMap<String, Value>,
    pub overridden_defaults: BTreeMap<String, Value>,
    pub overridden_correct_responses: BTreeMap<String, Value>,
    pub unbound_responses: BTreeSet<String>,
    pub invalid_responses: BTreeSet<String>,
}

impl ItemSessionState {
    pub fn phase(&self) -> ItemSessionPhase {
        if self.finished {
            ItemSessionPhase::Finished
        } else if self.suspended {
            ItemSessionPhase::Suspended
        } else if self.entry_time.is_some() {
            ItemSessionPhase::Interacting
        } else if self.initialized {
            ItemSessionPhase::Initialized
        } else {
            ItemSessionPhase::NotAttempted
        }
    }

    /// Current binding; NULL when unbound.
    pub fn value(&self, identifier: &str) -> Value {
        self.values.get(identifier).cloned().unwrap_or(Value::Null)
    }

    pub fn num_attempts(&self) -> i64 {
        self.values
            .get(crate::types::declarations::NUM_ATTEMPTS)
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    pub fn completion_status(&self) -> Option<&str> {
        self.values
            .get(crate::types::declarations::COMPLETION_STATUS)
            .and_then(Value::as_identifier)
    }

    /// Responded, with every response bound and valid.
    pub fn is_responded_validly(&self) -> bool {
        self.responded && self.unbound_responses.is_empty() && self.invalid_responses.is_empty()
    }
}
