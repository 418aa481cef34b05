//! Item session state machine.
//!
//! An [`ItemSessionController`] drives one candidate's session on one item:
//! `NotAttempted → Initialized → Interacting → (Suspended ⇄ Interacting) →
//! Finished`. Initialisation runs template processing; each submission binds
//! responses, runs response processing and then checks the finishing
//! criteria. A controller is single-threaded and never shared; the item
//! definition it runs is.

mod state;


use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use time::OffsetDateTime;

pub use state::{ItemSessionPhase, ItemSessionState};

use crate::cas::EvaluationService;
use crate::config::EngineSettings;
use crate::context::{EvalContext, RuntimeNotifications, VariableScope};
use crate::expression::evaluate;
use crate::listener::{LifecycleEvent, LifecycleListener};
use crate::result::{date_stamp, ItemResult, ResultVariable, SessionStatus};
use crate::rules::{execute_rules, RuleOutcome};
use crate::runtime::Runtime;
use crate::timing::{pass_maximum_time_limit, pass_minimum_time_limit, TimedControl};
use crate::types::declarations::{
    is_builtin, COMPLETION_COMPLETED, COMPLETION_STATUS, COMPLETION_UNKNOWN, DURATION,
    NUM_ATTEMPTS,
};
use crate::types::{
    AssessmentItem, Cardinality, EvalError, ItemSessionControl, SingleValue, SubmissionMode,
    TemplateDefault, TimeLimits, Value, VariableDeclaration, VariableKind,
};

// ──────────────────────────────────────────────
// Item scope
// ──────────────────────────────────────────────

/// The variables of one item session, as seen by expressions and rules.
pub(crate) struct ItemScope<'a> {
    pub item: &'a AssessmentItem,
    pub state: &'a mut ItemSessionState,
}

impl VariableScope for ItemScope<'_> {
    fn source(&self) -> &str {
        &self.item.identifier
    }

    fn declaration(&self, identifier: &str) -> Option<&VariableDeclaration> {
        self.item.declaration(identifier)
    }

    fn value(&self, identifier: &str) -> Option<Value> {
        self.item.declaration(identifier)?;
        Some(self.state.value(identifier))
    }

    fn set_value(&mut self, identifier: &str, value: Value) -> Result<(), EvalError> {
        if self.item.declaration(identifier).is_none() {
            return Err(EvalError::UnknownVariable {
                identifier: identifier.to_string(),
            });
        }
        self.state.values.insert(identifier.to_string(), value);
        Ok(())
    }

    fn correct_response(&self, identifier: &str) -> Option<Value> {
        let decl = self.item.declaration(identifier)?;
        Some(effective_correct_response(decl, self.state).unwrap_or(Value::Null))
    }

    fn default_value(&self, identifier: &str) -> Option<Value> {
        let decl = self.item.declaration(identifier)?;
        Some(
            self.state
                .overridden_defaults
                .get(identifier)
                .cloned()
                .unwrap_or_else(|| decl.initial_value()),
        )
    }

    fn set_correct_response(&mut self, identifier: &str, value: Value) -> Result<(), EvalError> {
        if self.item.declaration(identifier).is_none() {
            return Err(EvalError::UnknownVariable {
                identifier: identifier.to_string(),
            });
        }
        self.state
            .overridden_correct_responses
            .insert(identifier.to_string(), value);
        Ok(())
    }

    fn set_default_value(&mut self, identifier: &str, value: Value) -> Result<(), EvalError> {
        if self.item.declaration(identifier).is_none() {
            return Err(EvalError::UnknownVariable {
                identifier: identifier.to_string(),
            });
        }
        self.state
            .overridden_defaults
            .insert(identifier.to_string(), value);
        Ok(())
    }
}

/// Overridden or declared correct response; `None` when there is none.
fn effective_correct_response(decl: &VariableDeclaration, state: &ItemSessionState) -> Option<Value> {
    state
        .overridden_correct_responses
        .get(&decl.identifier)
        .or(decl.correct_response())
        .filter(|v| !v.is_null())
        .cloned()
}

/// Rebind every listed variable to its effective default.
fn reset_to_defaults<'d>(
    ctx: &mut EvalContext<'_>,
    declarations: impl Iterator<Item = &'d VariableDeclaration>,
) -> Result<(), EvalError> {
    for decl in declarations {
        let value = ctx.scope.default_value(&decl.identifier).unwrap_or(Value::Null);
        ctx.scope.set_value(&decl.identifier, value)?;
    }
    Ok(())
}

// ──────────────────────────────────────────────
// Controller
// ──────────────────────────────────────────────

/// What became of one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    /// Responses that could not be bound.
    pub unbound: BTreeSet<String>,
    /// Bound responses that violate their declaration.
    pub invalid: BTreeSet<String>,
    /// Response processing ran.
    pub processed: bool,
    /// The maximum time limit had passed; the session was closed instead.
    pub timed_out: bool,
}

#[derive(Debug)]
pub struct ItemSessionController {
    item: Arc<AssessmentItem>,
    state: ItemSessionState,
    control: ItemSessionControl,
    time_limits: Option<TimeLimits>,
    submission_mode: SubmissionMode,
    runtime: Runtime,
}

fn invalid_state(message: impl Into<String>) -> EvalError {
    EvalError::InvalidState {
        message: message.into(),
    }
}

impl ItemSessionController {
    pub fn new(item: Arc<AssessmentItem>, settings: EngineSettings) -> Self {
        Self::with_runtime(item, Runtime::new(settings))
    }

    pub(crate) fn with_runtime(item: Arc<AssessmentItem>, runtime: Runtime) -> Self {
        ItemSessionController {
            item,
            state: ItemSessionState::default(),
            control: ItemSessionControl::default(),
            time_limits: None,
            submission_mode: SubmissionMode::Individual,
            runtime,
        }
    }

    pub fn with_control(mut self, control: ItemSessionControl) -> Self {
        self.control = control;
        self
    }

    pub fn with_time_limits(mut self, time_limits: Option<TimeLimits>) -> Self {
        self.time_limits = time_limits;
        self
    }

    pub fn with_submission_mode(mut self, mode: SubmissionMode) -> Self {
        self.submission_mode = mode;
        self
    }

    pub fn set_evaluation_service(&mut self, service: Arc<dyn EvaluationService>) {
        self.runtime.cas = Some(service);
    }

    pub fn add_listener(&mut self, listener: Arc<dyn LifecycleListener>) {
        self.runtime.add_listener(listener);
    }

    pub fn item(&self) -> &AssessmentItem {
        &self.item
    }

    pub fn state(&self) -> &ItemSessionState {
        &self.state
    }

    pub fn control(&self) -> &ItemSessionControl {
        &self.control
    }

    pub fn time_limits(&self) -> Option<&TimeLimits> {
        self.time_limits.as_ref()
    }

    pub fn notifications(&self) -> &RuntimeNotifications {
        &self.runtime.notifications
    }

    /// Effective maxAttempts; 0 means unlimited.
    pub fn max_attempts(&self) -> i64 {
        self.control
            .max_attempts_or(self.runtime.settings.default_max_attempts)
    }

    /// Current binding of a declared variable.
    pub fn value(&self, identifier: &str) -> Option<Value> {
        self.item.declaration(identifier)?;
        Some(self.state.value(identifier))
    }

    fn ensure_initialized(&self) -> Result<(), EvalError> {
        if self.state.initialized {
            Ok(())
        } else {
            Err(EvalError::NotInitialized)
        }
    }

    fn ensure_open(&self) -> Result<(), EvalError> {
        self.ensure_initialized()?;
        if self.state.finished {
            return Err(invalid_state(format!(
                "item session '{}' has finished",
                self.item.identifier
            )));
        }
        Ok(())
    }

    fn sync_duration(&mut self) {
        let seconds = self.state.duration.seconds();
        self.state
            .values
            .insert(DURATION.to_string(), Value::float(seconds));
    }

    // ── Initialisation ─────────────────────────

    /// Bind every variable to its default and run template processing.
    ///
    /// `template_defaults` override the declared defaults of template
    /// variables. A failing template constraint restarts the run, up to the
    /// configured limit; past it the template variables keep their defaults.
    pub fn initialize(&mut self, template_defaults: &[TemplateDefault]) -> Result<(), EvalError> {
        if self.state.initialized {
            return Err(EvalError::AlreadyInitialized);
        }
        let _guard = self
            .runtime
            .listeners
            .scoped(LifecycleEvent::ItemInitialisationStarting);
        tracing::debug!(item = %self.item.identifier, "initialising item session");

        let item: &AssessmentItem = &self.item;
        let limit = self.runtime.settings.template_processing_limit;
        let mut scope = ItemScope {
            item,
            state: &mut self.state,
        };
        let mut ctx = self.runtime.context(&mut scope);

        for td in template_defaults {
            let is_template = ctx
                .scope
                .declaration(&td.template_identifier)
                .map(|d| d.kind() == VariableKind::Template)
                .unwrap_or(false);
            if !is_template {
                ctx.warn(format!(
                    "templateDefault: '{}' is not a template variable",
                    td.template_identifier
                ));
                continue;
            }
            let value = evaluate(&td.expression, &mut ctx)?;
            ctx.scope.set_default_value(&td.template_identifier, value)?;
        }

        let mut runs = 0u32;
        loop {
            runs += 1;
            reset_to_defaults(&mut ctx, item.template_declarations.iter())?;
            if runs > limit {
                ctx.warn(format!(
                    "template processing failed its constraints {} times; template variables keep their defaults",
                    limit
                ));
                break;
            }
            tracing::trace!(item = %item.identifier, run = runs, "template processing run");
            match execute_rules(&item.template_processing, &mut ctx)? {
                RuleOutcome::RetryTemplate => continue,
                RuleOutcome::Continue | RuleOutcome::ExitProcessing => break,
            }
        }
        if runs > 1 {
            ctx.notifications.info(
                &item.identifier,
                format!("template processing ran {} times", runs),
            );
        }

        reset_to_defaults(
            &mut ctx,
            item.declarations()
                .filter(|d| d.kind() != VariableKind::Template),
        )?;
        ctx.scope.set_value(NUM_ATTEMPTS, Value::integer(0))?;
        ctx.scope.set_value(DURATION, Value::float(0.0))?;

        self.state.initialized = true;
        Ok(())
    }

    // ── Lifecycle ──────────────────────────────

    /// Present the item to the candidate and start its clock.
    pub fn enter(&mut self, at: OffsetDateTime) -> Result<(), EvalError> {
        self.ensure_open()?;
        if self.state.entry_time.is_some() {
            return Err(invalid_state(format!(
                "item session '{}' was already entered",
                self.item.identifier
            )));
        }
        self.state.entry_time = Some(at);
        self.state.presented = true;
        self.state.duration.start(at);
        self.state.values.insert(
            COMPLETION_STATUS.to_string(),
            Value::identifier(COMPLETION_UNKNOWN),
        );
        Ok(())
    }

    pub fn suspend(&mut self, at: OffsetDateTime) -> Result<(), EvalError> {
        self.ensure_initialized()?;
        if self.state.phase() != ItemSessionPhase::Interacting {
            return Err(invalid_state(format!(
                "cannot suspend item session in phase {:?}",
                self.state.phase()
            )));
        }
        self.state.duration.stop(at);
        self.state.suspended = true;
        self.sync_duration();
        Ok(())
    }

    pub fn resume(&mut self, at: OffsetDateTime) -> Result<(), EvalError> {
        self.ensure_initialized()?;
        if self.state.phase() != ItemSessionPhase::Suspended {
            return Err(invalid_state(format!(
                "cannot resume item session in phase {:?}",
                self.state.phase()
            )));
        }
        self.state.suspended = false;
        self.state.duration.start(at);
        Ok(())
    }

    /// Fold the time spent so far into the `duration` variable.
    pub fn touch_duration(&mut self, at: OffsetDateTime) {
        self.state.duration.touch(at);
        self.sync_duration();
    }

    /// Close the session; no further submissions are accepted.
    pub fn end(&mut self, at: OffsetDateTime) -> Result<(), EvalError> {
        self.ensure_open()?;
        self.state.duration.stop(at);
        self.state.suspended = false;
        self.state.finished = true;
        self.state.end_time = Some(at);
        self.sync_duration();
        tracing::debug!(item = %self.item.identifier, "item session finished");
        Ok(())
    }

    pub fn exit(&mut self, at: OffsetDateTime) -> Result<(), EvalError> {
        self.ensure_initialized()?;
        if !self.state.finished {
            self.end(at)?;
        }
        self.state.exited = true;
        Ok(())
    }

    /// Move on without responding. Only allowed when skipping is allowed.
    pub fn skip(&mut self, at: OffsetDateTime) -> Result<(), EvalError> {
        self.ensure_open()?;
        if !self.control.allow_skipping() {
            return Err(invalid_state(format!(
                "item '{}' may not be skipped",
                self.item.identifier
            )));
        }
        if self.state.responded {
            return Err(invalid_state(format!(
                "item '{}' has already been responded to",
                self.item.identifier
            )));
        }
        self.state.skipped = true;
        self.end(at)
    }

    /// Close the session because its time limit ran out.
    pub fn time_out(&mut self, at: OffsetDateTime) -> Result<(), EvalError> {
        self.ensure_open()?;
        self.state.timed_out = true;
        self.end(at)
    }

    // ── Responses ──────────────────────────────

    /// Bind raw response strings to response variables.
    ///
    /// Responses bound to end-attempt controls are first set to false. The
    /// returned identifiers could not be bound (undeclared, wrong
    /// cardinality, or unparsable); their variables keep their values.
    pub fn bind_responses(
        &mut self,
        responses: &BTreeMap<String, Vec<String>>,
    ) -> Result<BTreeSet<String>, EvalError> {
        self.ensure_open()?;
        tracing::debug!(item = %self.item.identifier, count = responses.len(), "binding responses");
        for control in &self.item.end_attempts {
            if self.item.declaration(&control.response_identifier).is_some() {
                self.state
                    .values
                    .insert(control.response_identifier.clone(), Value::boolean(false));
            }
        }
        let mut unbound = BTreeSet::new();
        for (identifier, raw) in responses {
            match bind_response(&self.item, identifier, raw) {
                Ok(value) => {
                    self.state.values.insert(identifier.clone(), value);
                }
                Err(reason) => {
                    tracing::debug!(item = %self.item.identifier, response = %identifier, %reason, "response not bound");
                    unbound.insert(identifier.clone());
                }
            }
        }
        if !responses.is_empty() {
            self.state.responded = true;
        }
        self.state.pending_submission = true;
        self.state.unbound_responses = unbound.clone();
        self.state.invalid_responses = self.validate_responses();
        Ok(unbound)
    }

    /// Responses whose current value does not fit their declaration.
    pub fn validate_responses(&self) -> BTreeSet<String> {
        self.item
            .authored_responses()
            .filter(|d| !d.accepts(&self.state.value(&d.identifier)))
            .map(|d| d.identifier.clone())
            .collect()
    }

    /// Run response processing on the bound responses.
    ///
    /// The attempt counter goes up unless an end-attempt response is true
    /// with `countAttempt` off. Non-adaptive items start from default
    /// outcomes on every attempt.
    pub fn process_responses(&mut self) -> Result<(), EvalError> {
        self.ensure_initialized()?;
        let _guard = self
            .runtime
            .listeners
            .scoped(LifecycleEvent::ItemResponseProcessingStarting);
        tracing::debug!(item = %self.item.identifier, "response processing starting");

        let count_attempt = self
            .item
            .end_attempts
            .iter()
            .find(|c| self.state.value(&c.response_identifier).as_bool() == Some(true))
            .map_or(true, |c| c.count_attempt);
        if count_attempt {
            let attempts = self.state.num_attempts();
            self.state
                .values
                .insert(NUM_ATTEMPTS.to_string(), Value::integer(attempts + 1));
        }

        let item: &AssessmentItem = &self.item;
        let mut scope = ItemScope {
            item,
            state: &mut self.state,
        };
        let mut ctx = self.runtime.context(&mut scope);
        if !item.adaptive {
            reset_to_defaults(
                &mut ctx,
                item.outcome_declarations
                    .iter()
                    .filter(|d| !is_builtin(&d.identifier)),
            )?;
        }
        if execute_rules(&item.response_processing, &mut ctx)? == RuleOutcome::ExitProcessing {
            tracing::debug!(item = %item.identifier, "response processing ended by exitResponse");
        }
        self.state.pending_submission = false;
        Ok(())
    }

    /// Bind, process and check the finishing criteria in one step.
    ///
    /// Nothing is processed when some response cannot be bound, when
    /// `validateResponses` is on and a response is invalid, or in
    /// simultaneous submission mode (responses wait for the end of the
    /// test part).
    pub fn submit(
        &mut self,
        responses: &BTreeMap<String, Vec<String>>,
        at: OffsetDateTime,
    ) -> Result<Submission, EvalError> {
        self.ensure_open()?;
        if self.state.phase() != ItemSessionPhase::Interacting {
            return Err(invalid_state(format!(
                "cannot submit responses in phase {:?}",
                self.state.phase()
            )));
        }
        if !self.is_attempt_allowed() {
            return Err(invalid_state(format!(
                "no further attempts are allowed on item '{}'",
                self.item.identifier
            )));
        }
        self.touch_duration(at);
        let late_allowed = self
            .time_limits
            .as_ref()
            .map(|l| l.allow_late_submission)
            .unwrap_or(false);
        if !self.pass_maximum_time_limit() && !late_allowed {
            self.time_out(at)?;
            return Ok(Submission {
                timed_out: true,
                ..Submission::default()
            });
        }

        let unbound = self.bind_responses(responses)?;
        let invalid = self.state.invalid_responses.clone();
        let blocked = !unbound.is_empty() || (self.control.validate_responses() && !invalid.is_empty());
        if blocked || self.submission_mode == SubmissionMode::Simultaneous {
            return Ok(Submission {
                unbound,
                invalid,
                ..Submission::default()
            });
        }
        self.process_responses()?;
        if self.finishing_criteria_met() {
            self.end(at)?;
        }
        Ok(Submission {
            unbound,
            invalid,
            processed: true,
            timed_out: false,
        })
    }

    /// Process responses left pending by simultaneous submission.
    pub(crate) fn process_pending(&mut self) -> Result<bool, EvalError> {
        if !self.state.pending_submission || !self.state.unbound_responses.is_empty() {
            return Ok(false);
        }
        self.process_responses()?;
        Ok(true)
    }

    // ── Judgements ─────────────────────────────

    /// Adaptive items finish on `completionStatus = completed`; others in
    /// simultaneous mode, when correct, or when out of attempts.
    pub fn finishing_criteria_met(&self) -> bool {
        if self.item.adaptive {
            return self.state.completion_status() == Some(COMPLETION_COMPLETED);
        }
        let max = self.max_attempts();
        self.submission_mode == SubmissionMode::Simultaneous
            || self.is_correct() == Some(true)
            || (max != 0 && self.state.num_attempts() >= max)
    }

    pub fn is_attempt_allowed(&self) -> bool {
        if self.item.adaptive {
            return self.state.completion_status() != Some(COMPLETION_COMPLETED);
        }
        let max = self.max_attempts();
        max == 0 || self.state.num_attempts() < max
    }

    /// Whether a response matches its correct response; `None` when it
    /// has none.
    fn response_correct(&self, decl: &VariableDeclaration) -> Option<bool> {
        let correct = effective_correct_response(decl, &self.state)?;
        Some(correct == self.state.value(&decl.identifier))
    }

    /// All responses correct; `None` when some response has no correct
    /// response.
    pub fn is_correct(&self) -> Option<bool> {
        let judged: Option<Vec<bool>> = self
            .item
            .authored_responses()
            .map(|d| self.response_correct(d))
            .collect();
        judged.map(|all| all.into_iter().all(|c| c))
    }

    /// Some response incorrect; `None` when some response has no correct
    /// response.
    pub fn is_incorrect(&self) -> Option<bool> {
        self.is_correct().map(|c| !c)
    }

    pub fn count_correct(&self) -> usize {
        self.item
            .authored_responses()
            .filter(|d| self.response_correct(d) == Some(true))
            .count()
    }

    pub fn count_incorrect(&self) -> usize {
        self.item
            .authored_responses()
            .filter(|d| self.response_correct(d) != Some(true))
            .count()
    }

    // ── Time limits ────────────────────────────

    pub fn pass_maximum_time_limit(&self) -> bool {
        pass_maximum_time_limit(&[self.timed_control()])
    }

    pub fn pass_minimum_time_limit(&self) -> bool {
        pass_minimum_time_limit(&[self.timed_control()])
    }

    pub(crate) fn timed_control(&self) -> TimedControl<'_> {
        TimedControl {
            limits: self.time_limits.as_ref(),
            seconds: self.state.duration.seconds(),
        }
    }

    // ── Results ────────────────────────────────

    pub fn session_status(&self) -> SessionStatus {
        if self.state.pending_submission {
            SessionStatus::PendingSubmission
        } else if self.state.num_attempts() > 0 {
            SessionStatus::Final
        } else {
            SessionStatus::Initial
        }
    }

    /// Record every variable binding of this session.
    pub fn compute_item_result(&self) -> ItemResult {
        self.item_result(&self.item.identifier, None, OffsetDateTime::now_utc())
    }

    pub(crate) fn item_result(
        &self,
        identifier: &str,
        sequence_index: Option<usize>,
        at: OffsetDateTime,
    ) -> ItemResult {
        let mut variables = Vec::new();
        for kind in [
            VariableKind::Outcome,
            VariableKind::Response,
            VariableKind::Template,
        ] {
            for decl in self.item.declarations().filter(|d| d.kind() == kind) {
                variables.push(ResultVariable::new(decl, &self.state.value(&decl.identifier)));
            }
        }
        ItemResult {
            identifier: identifier.to_string(),
            sequence_index,
            date_stamp: date_stamp(at),
            session_status: self.session_status(),
            variables,
        }
    }
}

/// Parse raw response strings for a response variable.
fn bind_response(
    item: &AssessmentItem,
    identifier: &str,
    raw: &[String],
) -> Result<Value, String> {
    let decl = item
        .declaration(identifier)
        .filter(|d| d.kind() == VariableKind::Response && !is_builtin(&d.identifier))
        .ok_or_else(|| format!("'{}' is not a response variable", identifier))?;
    let base_type = match (decl.cardinality, decl.base_type) {
        (Cardinality::Record, _) | (_, None) => {
            return Err("record responses cannot be bound from strings".to_string())
        }
        (_, Some(bt)) => bt,
    };
    let values = raw
        .iter()
        .map(|s| SingleValue::parse(base_type, s))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;
    Value::list(decl.cardinality, base_type, values).map_err(|e| e.to_string())
}
