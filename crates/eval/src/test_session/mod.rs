//! Test session controller.
//!
//! A [`TestSessionController`] plans a test once, owns one
//! [`ItemSessionController`] per item-ref node of the plan, and moves the
//! candidate through test parts and items. Test outcome processing runs
//! over a [`TestScope`] that exposes test outcomes, dotted item variable
//! references and item subsets.

pub mod plan;


use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use time::OffsetDateTime;

pub use plan::{PlanNodeKind, TestPlan, TestPlanNode};

use crate::cas::EvaluationService;
use crate::config::EngineSettings;
use crate::context::{DottedValue, ItemView, RuntimeNotifications, VariableScope};
use crate::listener::{LifecycleEvent, LifecycleListener};
use crate::result::{date_stamp, AssessmentResult, ResultVariable, TestResult};
use crate::rules::{execute_rules, RuleOutcome};
use crate::runtime::Runtime;
use crate::session::{ItemSessionController, ItemSessionPhase, Submission};
use crate::timing::{pass_maximum_time_limit, Timer, TimedControl};
use crate::types::declarations::{is_builtin, DURATION};
use crate::types::{
    AssessmentItem, AssessmentItemRef, AssessmentTest, EvalError, ItemSessionControl, ItemSubset,
    NavigationMode, SubmissionMode, TestFeedback, TestFeedbackAccess, TimeLimits, Value,
    VariableDeclaration, Visibility,
};

fn invalid_state(message: impl Into<String>) -> EvalError {
    EvalError::InvalidState {
        message: message.into(),
    }
}

// ──────────────────────────────────────────────
// Item entries
// ──────────────────────────────────────────────

/// One item-ref node of the plan and its session.
#[derive(Debug)]
pub struct ItemEntry {
    pub item_ref: AssessmentItemRef,
    pub instance: usize,
    pub part_index: usize,
    /// Enclosing sections in the test definition, outermost first.
    pub sections: Vec<String>,
    pub session: ItemSessionController,
}

impl ItemEntry {
    fn matches(&self, subset: &ItemSubset) -> bool {
        if let Some(section) = &subset.section_identifier {
            if !self.sections.contains(section) {
                return false;
            }
        }
        let has = |c: &String| self.item_ref.categories.contains(c);
        (subset.include_categories.is_empty() || subset.include_categories.iter().any(has))
            && !subset.exclude_categories.iter().any(has)
    }
}

impl ItemView for ItemEntry {
    fn item_ref_identifier(&self) -> &str {
        &self.item_ref.identifier
    }

    fn is_presented(&self) -> bool {
        self.session.state().presented
    }

    fn is_responded(&self) -> bool {
        self.session.state().responded
    }

    fn is_correct(&self) -> Option<bool> {
        self.session.is_correct()
    }

    fn is_incorrect(&self) -> bool {
        self.session.is_incorrect() == Some(true)
    }

    fn declaration(&self, identifier: &str) -> Option<&VariableDeclaration> {
        self.session.item().declaration(identifier)
    }

    fn value(&self, identifier: &str) -> Option<Value> {
        self.session.value(identifier)
    }

    fn weight(&self, weight_identifier: &str) -> Option<f64> {
        self.item_ref.weights.get(weight_identifier).copied()
    }
}

// ──────────────────────────────────────────────
// Test scope
// ──────────────────────────────────────────────

/// Test outcomes plus read access to every item session.
pub(crate) struct TestScope<'a> {
    pub test: &'a AssessmentTest,
    pub values: &'a mut BTreeMap<String, Value>,
    pub items: &'a [ItemEntry],
}

impl TestScope<'_> {
    fn undeclared(identifier: &str) -> EvalError {
        EvalError::UnknownVariable {
            identifier: identifier.to_string(),
        }
    }
}

impl VariableScope for TestScope<'_> {
    fn source(&self) -> &str {
        &self.test.identifier
    }

    fn declaration(&self, identifier: &str) -> Option<&VariableDeclaration> {
        self.test.declaration(identifier)
    }

    fn value(&self, identifier: &str) -> Option<Value> {
        self.test.declaration(identifier)?;
        Some(self.values.get(identifier).cloned().unwrap_or(Value::Null))
    }

    fn set_value(&mut self, identifier: &str, value: Value) -> Result<(), EvalError> {
        if self.test.declaration(identifier).is_none() {
            return Err(Self::undeclared(identifier));
        }
        self.values.insert(identifier.to_string(), value);
        Ok(())
    }

    fn correct_response(&self, identifier: &str) -> Option<Value> {
        self.test.declaration(identifier).map(|_| Value::Null)
    }

    fn default_value(&self, identifier: &str) -> Option<Value> {
        self.test.declaration(identifier).map(|d| d.initial_value())
    }

    fn set_correct_response(&mut self, identifier: &str, _value: Value) -> Result<(), EvalError> {
        Err(EvalError::TypeError {
            message: format!("test outcome '{}' has no correct response", identifier),
        })
    }

    fn set_default_value(&mut self, identifier: &str, _value: Value) -> Result<(), EvalError> {
        Err(EvalError::TypeError {
            message: format!("test outcome '{}' has a fixed default", identifier),
        })
    }

    fn is_test(&self) -> bool {
        true
    }

    fn item_subset(&self, subset: &ItemSubset) -> Vec<&dyn ItemView> {
        self.items
            .iter()
            .filter(|e| e.matches(subset))
            .map(|e| e as &dyn ItemView)
            .collect()
    }

    fn selected_item_count(&self) -> usize {
        self.items.len()
    }

    fn dotted_value(&self, item_ref: &str, instance: Option<usize>, identifier: &str) -> DottedValue {
        let matching: Vec<&ItemEntry> = self
            .items
            .iter()
            .filter(|e| e.item_ref.identifier == item_ref)
            .collect();
        if matching.is_empty() {
            return match self.test.item_ref(item_ref) {
                Some(_) => DottedValue::NoInstance,
                None => DottedValue::UnknownVariable,
            };
        }
        let entry = match instance {
            Some(n) => match matching.iter().find(|e| e.instance == n) {
                Some(e) => *e,
                None => return DottedValue::NoInstance,
            },
            None => matching[0],
        };
        match entry.session.value(identifier) {
            None => DottedValue::UnknownVariable,
            Some(value) if instance.is_none() && matching.len() > 1 => DottedValue::FirstOf {
                value,
                instances: matching.len(),
            },
            Some(value) => DottedValue::Found(value),
        }
    }

    fn item_ref_weight(&self, item_ref: &str, weight_identifier: &str) -> Option<f64> {
        self.test
            .item_ref(item_ref)?
            .weights
            .get(weight_identifier)
            .copied()
    }
}

// ──────────────────────────────────────────────
// Controller
// ──────────────────────────────────────────────

/// Navigation and timing state of a test session.
#[derive(Debug, Clone, Default)]
pub struct TestSessionState {
    pub initialized: bool,
    pub entered: bool,
    pub finished: bool,
    pub exited: bool,
    pub current_part: Option<usize>,
    /// Index into the plan's item list.
    pub current_item: Option<usize>,
    pub ended_parts: BTreeSet<usize>,
    pub duration: Timer,
    pub part_durations: Vec<Timer>,
    pub section_durations: BTreeMap<String, Timer>,
    pub values: BTreeMap<String, Value>,
}

#[derive(Debug)]
pub struct TestSessionController {
    test: Arc<AssessmentTest>,
    plan: TestPlan,
    items: Vec<ItemEntry>,
    state: TestSessionState,
    runtime: Runtime,
}

impl TestSessionController {
    /// Plan `test` and create an item session for every planned item ref.
    ///
    /// `items` maps item document identifiers (item ref hrefs) to items.
    pub fn new(
        test: Arc<AssessmentTest>,
        items: &BTreeMap<String, Arc<AssessmentItem>>,
        settings: EngineSettings,
    ) -> Self {
        let mut runtime = Runtime::new(settings);
        let plan = plan::plan(
            &test,
            |r| items.contains_key(&r.href),
            &mut runtime.rng,
            &mut runtime.notifications,
        );

        let definitions: BTreeMap<&str, (&AssessmentItemRef, Vec<&str>)> = test
            .item_refs()
            .into_iter()
            .map(|(r, ancestry)| (r.identifier.as_str(), (r, ancestry)))
            .collect();

        let mut entries = Vec::new();
        for (part_index, node) in plan.item_refs() {
            let Some((item_ref, ancestry)) = definitions.get(node.identifier.as_str()) else {
                continue;
            };
            let Some(item) = items.get(&item_ref.href) else {
                continue;
            };
            let part = &test.test_parts[part_index];
            let control = effective_control(&test, item_ref, ancestry, part_index);
            let session = ItemSessionController::with_runtime(Arc::clone(item), runtime.child())
                .with_control(control)
                .with_time_limits(item_ref.time_limits.clone())
                .with_submission_mode(part.submission_mode);
            entries.push(ItemEntry {
                item_ref: (*item_ref).clone(),
                instance: node.instance,
                part_index,
                sections: ancestry.iter().map(|s| s.to_string()).collect(),
                session,
            });
        }

        let state = TestSessionState {
            part_durations: vec![Timer::default(); test.test_parts.len()],
            section_durations: test
                .sections()
                .into_iter()
                .map(|s| (s.identifier.clone(), Timer::default()))
                .collect(),
            ..TestSessionState::default()
        };

        TestSessionController {
            test,
            plan,
            items: entries,
            state,
            runtime,
        }
    }

    pub fn test(&self) -> &AssessmentTest {
        &self.test
    }

    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    pub fn state(&self) -> &TestSessionState {
        &self.state
    }

    pub fn items(&self) -> &[ItemEntry] {
        &self.items
    }

    /// Test-level notifications (planning, outcome processing).
    pub fn notifications(&self) -> &RuntimeNotifications {
        &self.runtime.notifications
    }

    /// Test-level and item-level notifications together.
    pub fn all_notifications(&self) -> RuntimeNotifications {
        let mut all = self.runtime.notifications.clone();
        for entry in &self.items {
            all.extend(entry.session.notifications().clone());
        }
        all
    }

    pub fn add_listener(&mut self, listener: Arc<dyn LifecycleListener>) {
        self.runtime.add_listener(Arc::clone(&listener));
        for entry in &mut self.items {
            entry.session.add_listener(Arc::clone(&listener));
        }
    }

    pub fn set_evaluation_service(&mut self, service: Arc<dyn EvaluationService>) {
        self.runtime.cas = Some(Arc::clone(&service));
        for entry in &mut self.items {
            entry.session.set_evaluation_service(Arc::clone(&service));
        }
    }

    /// Current value of a test outcome.
    pub fn value(&self, identifier: &str) -> Option<Value> {
        self.test.declaration(identifier)?;
        Some(self.state.values.get(identifier).cloned().unwrap_or(Value::Null))
    }

    pub fn item_session(&self, item_ref: &str, instance: usize) -> Option<&ItemSessionController> {
        self.items
            .iter()
            .find(|e| e.item_ref.identifier == item_ref && e.instance == instance)
            .map(|e| &e.session)
    }

    pub fn current_item(&self) -> Option<&ItemEntry> {
        self.state.current_item.map(|i| &self.items[i])
    }

    pub fn current_test_part(&self) -> Option<&str> {
        self.state
            .current_part
            .map(|i| self.test.test_parts[i].identifier.as_str())
    }

    fn ensure_initialized(&self) -> Result<(), EvalError> {
        if self.state.initialized {
            Ok(())
        } else {
            Err(EvalError::NotInitialized)
        }
    }

    fn ensure_running(&self) -> Result<(), EvalError> {
        self.ensure_initialized()?;
        if !self.state.entered {
            return Err(invalid_state("test has not been entered"));
        }
        if self.state.finished {
            return Err(invalid_state("test is finished"));
        }
        Ok(())
    }

    fn current_part_index(&self) -> Result<usize, EvalError> {
        match self.state.current_part {
            Some(i) if !self.state.ended_parts.contains(&i) => Ok(i),
            Some(_) => Err(invalid_state("current test part has ended")),
            None => Err(invalid_state("not in a test part")),
        }
    }

    fn items_in_part(&self, part_index: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.items.len()).filter(move |&i| self.items[i].part_index == part_index)
    }

    // ── Initialisation ─────────────────────────

    /// Reset test outcomes and initialise every item session.
    pub fn initialize(&mut self) -> Result<(), EvalError> {
        if self.state.initialized {
            return Err(EvalError::AlreadyInitialized);
        }
        let _guard = self
            .runtime
            .listeners
            .scoped(LifecycleEvent::TestInitialisationStarting);
        tracing::debug!(test = %self.test.identifier, items = self.items.len(), "initialising test session");

        self.state.values = self
            .test
            .declarations()
            .map(|d| (d.identifier.clone(), d.initial_value()))
            .collect();
        for entry in &mut self.items {
            entry.session.initialize(&entry.item_ref.template_defaults)?;
        }
        self.state.initialized = true;
        Ok(())
    }

    // ── Durations ──────────────────────────────

    /// Fold elapsed time into every running timer and the `duration`
    /// variables.
    pub fn touch_durations(&mut self, at: OffsetDateTime) {
        self.state.duration.touch(at);
        for timer in &mut self.state.part_durations {
            timer.touch(at);
        }
        for timer in self.state.section_durations.values_mut() {
            timer.touch(at);
        }
        if let Some(index) = self.state.current_item {
            self.items[index].session.touch_duration(at);
        }
        self.state.values.insert(
            DURATION.to_string(),
            Value::float(self.state.duration.seconds()),
        );
    }

    /// Run only the timers of `sections`.
    fn switch_sections(&mut self, sections: &[String], at: OffsetDateTime) {
        for (identifier, timer) in self.state.section_durations.iter_mut() {
            if sections.contains(identifier) {
                timer.start(at);
            } else {
                timer.stop(at);
            }
        }
    }

    fn section_limits(&self, identifier: &str) -> Option<&TimeLimits> {
        self.test
            .sections()
            .into_iter()
            .find(|s| s.identifier == identifier)
            .and_then(|s| s.time_limits.as_ref())
    }

    /// Check the maximum time limits of an item and everything enclosing
    /// it, innermost first. An index outside the plan has no limits.
    pub fn pass_maximum_time_limit(&self, item_index: usize) -> bool {
        let Some(entry) = self.items.get(item_index) else {
            return true;
        };
        let mut chain = vec![entry.session.timed_control()];
        for section in entry.sections.iter().rev() {
            chain.push(TimedControl {
                limits: self.section_limits(section),
                seconds: self
                    .state
                    .section_durations
                    .get(section)
                    .map_or(0.0, Timer::seconds),
            });
        }
        chain.push(TimedControl {
            limits: self.test.test_parts[entry.part_index].time_limits.as_ref(),
            seconds: self.state.part_durations[entry.part_index].seconds(),
        });
        chain.push(TimedControl {
            limits: self.test.time_limits.as_ref(),
            seconds: self.state.duration.seconds(),
        });
        pass_maximum_time_limit(&chain)
    }

    fn late_submission_allowed(&self, item_index: usize) -> bool {
        self.items[item_index]
            .session
            .time_limits()
            .map_or(false, |l| l.allow_late_submission)
    }

    // ── Navigation ─────────────────────────────

    pub fn enter_test(&mut self, at: OffsetDateTime) -> Result<(), EvalError> {
        self.ensure_initialized()?;
        if self.state.entered {
            return Err(invalid_state("test was already entered"));
        }
        self.state.entered = true;
        self.state.duration.start(at);
        tracing::debug!(test = %self.test.identifier, "test entered");
        Ok(())
    }

    pub fn has_more_test_parts(&self) -> Result<bool, EvalError> {
        self.ensure_running()?;
        let next = self.state.current_part.map_or(0, |i| i + 1);
        Ok(next < self.test.test_parts.len())
    }

    /// Move to the next test part; the current one must have ended.
    /// Returns `None` when there are no more parts.
    pub fn enter_next_test_part(&mut self, at: OffsetDateTime) -> Result<Option<&str>, EvalError> {
        self.ensure_running()?;
        if let Some(current) = self.state.current_part {
            if !self.state.ended_parts.contains(&current) {
                return Err(invalid_state("current test part has not ended"));
            }
        }
        if !self.has_more_test_parts()? {
            return Ok(None);
        }
        let next = self.state.current_part.map_or(0, |i| i + 1);
        self.state.current_part = Some(next);
        self.state.current_item = None;
        self.state.part_durations[next].start(at);
        let identifier = self.test.test_parts[next].identifier.as_str();
        tracing::debug!(test = %self.test.identifier, part = identifier, "entered test part");
        Ok(Some(identifier))
    }

    pub fn has_more_items(&self) -> Result<bool, EvalError> {
        self.ensure_running()?;
        let part = self.current_part_index()?;
        let after = self.state.current_item;
        Ok(self
            .items_in_part(part)
            .any(|i| after.map_or(true, |current| i > current)))
    }

    /// Leave the current item the way the part's modes dictate.
    fn leave_current_item(&mut self, at: OffsetDateTime) -> Result<(), EvalError> {
        let Some(index) = self.state.current_item else {
            return Ok(());
        };
        let part = &self.test.test_parts[self.items[index].part_index];
        let keeps_open = part.navigation_mode == NavigationMode::Nonlinear
            || part.submission_mode == SubmissionMode::Simultaneous;
        let session = &mut self.items[index].session;
        match session.state().phase() {
            ItemSessionPhase::Interacting if keeps_open => session.suspend(at)?,
            ItemSessionPhase::Interacting | ItemSessionPhase::Suspended if !keeps_open => {
                if session.state().responded {
                    session.end(at)?;
                } else {
                    session.skip(at)?;
                }
            }
            _ => {}
        }
        self.state.current_item = None;
        Ok(())
    }

    fn present(&mut self, index: usize, at: OffsetDateTime) -> Result<(), EvalError> {
        let sections = self.items[index].sections.clone();
        self.switch_sections(&sections, at);
        let session = &mut self.items[index].session;
        match session.state().phase() {
            ItemSessionPhase::Initialized => session.enter(at)?,
            ItemSessionPhase::Suspended => session.resume(at)?,
            ItemSessionPhase::Interacting => {}
            phase => {
                return Err(invalid_state(format!(
                    "item '{}' cannot be presented in phase {:?}",
                    self.items[index].item_ref.identifier, phase
                )))
            }
        }
        self.state.current_item = Some(index);
        Ok(())
    }

    /// Move to the next item of the current part. In individual linear
    /// parts the item being left is ended, or skipped when unanswered.
    pub fn enter_next_item(&mut self, at: OffsetDateTime) -> Result<Option<&ItemEntry>, EvalError> {
        self.ensure_running()?;
        let part = self.current_part_index()?;
        self.touch_durations(at);
        let after = self.state.current_item;
        let next = self
            .items_in_part(part)
            .find(|&i| after.map_or(true, |current| i > current));
        self.leave_current_item(at)?;
        match next {
            Some(index) => {
                self.present(index, at)?;
                Ok(Some(&self.items[index]))
            }
            None => {
                self.switch_sections(&[], at);
                Ok(None)
            }
        }
    }

    /// Jump to an item of the current part; nonlinear parts only.
    pub fn select_item(
        &mut self,
        item_ref: &str,
        instance: usize,
        at: OffsetDateTime,
    ) -> Result<&ItemEntry, EvalError> {
        self.ensure_running()?;
        let part = self.current_part_index()?;
        if self.test.test_parts[part].navigation_mode != NavigationMode::Nonlinear {
            return Err(invalid_state("items can only be selected in nonlinear test parts"));
        }
        let index = self
            .items_in_part(part)
            .find(|&i| {
                self.items[i].item_ref.identifier == item_ref && self.items[i].instance == instance
            })
            .ok_or_else(|| {
                invalid_state(format!(
                    "item '{}' instance {} is not in the current test part",
                    item_ref, instance
                ))
            })?;
        self.touch_durations(at);
        if self.state.current_item != Some(index) {
            self.leave_current_item(at)?;
        }
        self.present(index, at)?;
        Ok(&self.items[index])
    }

    /// Submit responses to the current item.
    ///
    /// In individual mode a processed submission is followed by test
    /// outcome processing.
    pub fn submit_item(
        &mut self,
        responses: &BTreeMap<String, Vec<String>>,
        at: OffsetDateTime,
    ) -> Result<Submission, EvalError> {
        self.ensure_running()?;
        let index = self
            .state
            .current_item
            .ok_or_else(|| invalid_state("no current item"))?;
        self.touch_durations(at);
        if !self.pass_maximum_time_limit(index) && !self.late_submission_allowed(index) {
            self.items[index].session.time_out(at)?;
            tracing::debug!(item = %self.items[index].item_ref.identifier, "time limit exceeded");
            return Ok(Submission {
                timed_out: true,
                ..Submission::default()
            });
        }
        let submission = self.items[index].session.submit(responses, at)?;
        if submission.processed {
            self.perform_outcome_processing()?;
        }
        Ok(submission)
    }

    fn effective_control(&self, index: usize) -> &ItemSessionControl {
        self.items[index].session.control()
    }

    /// Whether an item may be reviewed. The item must belong to the
    /// current test part, which may already have ended, and its session
    /// must be closed with review allowed by its effective control.
    pub fn may_review_item(&self, item_ref: &str, instance: usize) -> Result<bool, EvalError> {
        self.ensure_initialized()?;
        let Some(part) = self.state.current_part else {
            return Ok(false);
        };
        let found = self.items_in_part(part).find(|&i| {
            self.items[i].item_ref.identifier == item_ref && self.items[i].instance == instance
        });
        Ok(found.map_or(false, |i| {
            let state = self.items[i].session.state();
            (state.finished || state.exited) && self.effective_control(i).allow_review()
        }))
    }

    /// Whether every item of the current part may be left behind.
    pub fn may_end_test_part(&self) -> Result<bool, EvalError> {
        self.ensure_running()?;
        let part = self.current_part_index()?;
        Ok(self.items_in_part(part).all(|i| {
            let control = self.effective_control(i);
            let state = self.items[i].session.state();
            (control.allow_skipping() || state.responded)
                && (!control.validate_responses() || state.is_responded_validly())
        }))
    }

    /// Close the current part: process pending simultaneous submissions,
    /// end every item and, when any were processed, run outcome
    /// processing. Ending the last part finishes the test.
    pub fn end_test_part(&mut self, at: OffsetDateTime) -> Result<(), EvalError> {
        if !self.may_end_test_part()? {
            return Err(invalid_state(
                "current test part has unanswered or invalid items",
            ));
        }
        let part = self.current_part_index()?;
        self.touch_durations(at);
        self.leave_current_item(at)?;

        let mut processed = false;
        let indices: Vec<usize> = self.items_in_part(part).collect();
        for index in indices {
            let session = &mut self.items[index].session;
            if session.state().phase() == ItemSessionPhase::Finished {
                continue;
            }
            processed |= session.process_pending()?;
            session.end(at)?;
        }
        if processed {
            self.perform_outcome_processing()?;
        }

        self.switch_sections(&[], at);
        self.state.part_durations[part].stop(at);
        self.state.ended_parts.insert(part);
        if part + 1 == self.test.test_parts.len() {
            self.state.finished = true;
            self.state.duration.stop(at);
        }
        self.touch_durations(at);
        tracing::debug!(test = %self.test.identifier, part = %self.test.test_parts[part].identifier, "test part ended");
        Ok(())
    }

    /// Leave the test, closing every item session.
    pub fn exit_test(&mut self, at: OffsetDateTime) -> Result<(), EvalError> {
        self.ensure_initialized()?;
        if self.state.exited {
            return Err(invalid_state("test was already exited"));
        }
        self.touch_durations(at);
        for entry in &mut self.items {
            entry.session.exit(at)?;
        }
        for timer in &mut self.state.part_durations {
            timer.stop(at);
        }
        self.switch_sections(&[], at);
        self.state.duration.stop(at);
        self.state.current_item = None;
        self.state.current_part = None;
        self.state.finished = true;
        self.state.exited = true;
        tracing::debug!(test = %self.test.identifier, "test exited");
        Ok(())
    }

    // ── Outcome processing ─────────────────────

    /// Reset test outcomes to their defaults and run outcome processing.
    pub fn perform_outcome_processing(&mut self) -> Result<(), EvalError> {
        self.ensure_initialized()?;
        let _guard = self
            .runtime
            .listeners
            .scoped(LifecycleEvent::TestOutcomeProcessingStarting);
        tracing::debug!(test = %self.test.identifier, "outcome processing starting");

        let test: &AssessmentTest = &self.test;
        for decl in test.declarations().filter(|d| !is_builtin(&d.identifier)) {
            self.state
                .values
                .insert(decl.identifier.clone(), decl.initial_value());
        }
        let mut scope = TestScope {
            test,
            values: &mut self.state.values,
            items: &self.items,
        };
        let mut ctx = self.runtime.context(&mut scope);
        if execute_rules(&test.outcome_processing, &mut ctx)? == RuleOutcome::ExitProcessing {
            tracing::debug!(test = %test.identifier, "outcome processing ended by exitTest");
        }
        Ok(())
    }

    // ── Feedback ───────────────────────────────

    /// Test and test-part feedback visible for the requested access.
    /// `atEnd` feedback needs the test (or its part) to be over.
    pub fn get_test_feedbacks(&self, access: TestFeedbackAccess) -> Vec<&TestFeedback> {
        let test_over = self.state.finished;
        let mut visible: Vec<&TestFeedback> = Vec::new();
        if access == TestFeedbackAccess::During || test_over {
            visible.extend(
                self.test
                    .test_feedbacks
                    .iter()
                    .filter(|f| f.access == access && self.feedback_shown(f)),
            );
        }
        if let Some(part) = self.state.current_part {
            let part_over = self.state.ended_parts.contains(&part);
            if access == TestFeedbackAccess::During || part_over {
                visible.extend(
                    self.test.test_parts[part]
                        .test_feedbacks
                        .iter()
                        .filter(|f| f.access == access && self.feedback_shown(f)),
                );
            }
        }
        visible
    }

    fn feedback_shown(&self, feedback: &TestFeedback) -> bool {
        let value = self.value(&feedback.outcome_identifier).unwrap_or(Value::Null);
        let matched = value
            .elements()
            .iter()
            .any(|v| v.to_string() == feedback.identifier);
        match feedback.visibility {
            Visibility::ShowIfMatch => matched,
            Visibility::HideIfMatch => !matched,
        }
    }

    // ── Results ────────────────────────────────

    /// Test outcomes, durations and every item result, in plan order.
    pub fn compute_assessment_result(&self, at: OffsetDateTime) -> AssessmentResult {
        let mut variables: Vec<ResultVariable> = self
            .test
            .declarations()
            .map(|d| {
                let value = self.state.values.get(&d.identifier).cloned().unwrap_or(Value::Null);
                ResultVariable::new(d, &value)
            })
            .collect();
        for (part, timer) in self.test.test_parts.iter().zip(&self.state.part_durations) {
            variables.push(ResultVariable::duration(
                format!("{}.{}", part.identifier, DURATION),
                timer.seconds(),
            ));
        }
        for section in self.plan.section_identifiers() {
            let seconds = self
                .state
                .section_durations
                .get(section)
                .map_or(0.0, Timer::seconds);
            variables.push(ResultVariable::duration(
                format!("{}.{}", section, DURATION),
                seconds,
            ));
        }

        let item_results = self
            .items
            .iter()
            .enumerate()
            .map(|(i, e)| e.session.item_result(&e.item_ref.identifier, Some(i + 1), at))
            .collect();

        AssessmentResult {
            date_stamp: date_stamp(at),
            test_result: TestResult {
                identifier: self.test.identifier.clone(),
                date_stamp: date_stamp(at),
                variables,
            },
            item_results,
        }
    }
}

/// The item ref's own control, filled from its sections (innermost
/// first) and then the test part.
fn effective_control(
    test: &AssessmentTest,
    item_ref: &AssessmentItemRef,
    ancestry: &[&str],
    part_index: usize,
) -> ItemSessionControl {
    let sections = test.sections();
    let mut control = item_ref.item_session_control.clone().unwrap_or_default();
    for identifier in ancestry.iter().rev() {
        if let Some(outer) = sections
            .iter()
            .find(|s| s.identifier == *identifier)
            .and_then(|s| s.item_session_control.as_ref())
        {
            control = control.inherit(outer);
        }
    }
    if let Some(outer) = &test.test_parts[part_index].item_session_control {
        control = control.inherit(outer);
    }
    control
}
