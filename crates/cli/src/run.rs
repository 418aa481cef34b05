//! Run files: scripted candidate sessions for `run-item` and `run-test`.
//!
//! A run file names the document to drive and the responses to submit:
//!
//! ```json
//! {
//!   "target": "test",
//!   "document": "quiz",
//!   "seed": 7,
//!   "submissions": [
//!     {"item": "r1", "responses": {"RESPONSE": ["A"]}}
//!   ]
//! }
//! ```
//!
//! Item runs ignore the `item` field. Test runs walk every part in order,
//! entering each item and submitting the responses recorded for its ref.

use std::collections::BTreeMap;
use std::path::Path;

use qti_eval::{
    AssessmentPackage, AssessmentResult, EngineSettings, EvalError, ItemResult,
    RuntimeNotification,
};
use serde::Deserialize;
use time::{Duration, OffsetDateTime};

/// Seconds the simulated candidate spends between two steps.
const STEP_SECONDS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTarget {
    Item,
    Test,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunFile {
    #[serde(default)]
    pub target: Option<RunTarget>,
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub submissions: Vec<SubmissionSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionSpec {
    #[serde(default)]
    pub item: Option<String>,
    pub responses: BTreeMap<String, Vec<String>>,
}

impl RunFile {
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("error reading file '{}': {}", path.display(), e))?;
        serde_json::from_str(&text)
            .map_err(|e| format!("error parsing run file '{}': {}", path.display(), e))
    }

    /// A run holding one submission per inline responses object.
    pub fn from_responses(responses: &[String]) -> Result<Self, String> {
        let submissions = responses
            .iter()
            .map(|text| {
                serde_json::from_str(text)
                    .map(|responses| SubmissionSpec {
                        item: None,
                        responses,
                    })
                    .map_err(|e| format!("error parsing responses '{}': {}", text, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RunFile {
            submissions,
            ..RunFile::default()
        })
    }

    /// Check that the file agrees with the command it was given to.
    pub fn check_target(&self, expected: RunTarget, document: &str) -> Result<(), String> {
        if let Some(target) = self.target {
            if target != expected {
                return Err(format!(
                    "run file targets {:?}, not {:?}",
                    target, expected
                ));
            }
        }
        match &self.document {
            Some(d) if d != document => Err(format!(
                "run file is for document '{}', not '{}'",
                d, document
            )),
            _ => Ok(()),
        }
    }
}

/// Simulated wall clock, advancing a fixed step per candidate action.
struct Clock {
    now: OffsetDateTime,
}

impl Clock {
    fn start() -> Self {
        Clock {
            now: OffsetDateTime::now_utc(),
        }
    }

    fn tick(&mut self) -> OffsetDateTime {
        self.now += Duration::seconds(STEP_SECONDS);
        self.now
    }
}

#[derive(Debug)]
pub struct ItemOutcome {
    pub result: ItemResult,
    pub finished: bool,
    /// Submissions that did not lead to response processing.
    pub unprocessed: Vec<usize>,
    pub notifications: Vec<RuntimeNotification>,
}

/// Drive a standalone item session through every submission.
pub fn run_item(
    package: &AssessmentPackage,
    identifier: &str,
    settings: EngineSettings,
    run: &RunFile,
) -> Result<ItemOutcome, EvalError> {
    let mut clock = Clock::start();
    let mut session = package.item_session(identifier, settings)?;
    session.initialize(&[])?;
    session.enter(clock.tick())?;

    let mut unprocessed = Vec::new();
    for (i, submission) in run.submissions.iter().enumerate() {
        if session.state().finished {
            tracing::warn!(item = identifier, submission = i, "session finished, submission ignored");
            unprocessed.push(i);
            continue;
        }
        let outcome = session.submit(&submission.responses, clock.tick())?;
        if !outcome.processed {
            tracing::debug!(
                item = identifier,
                unbound = ?outcome.unbound,
                invalid = ?outcome.invalid,
                "submission not processed"
            );
            unprocessed.push(i);
        }
    }

    Ok(ItemOutcome {
        result: session.compute_item_result(),
        finished: session.state().finished,
        unprocessed,
        notifications: session.notifications().all().to_vec(),
    })
}

#[derive(Debug)]
pub struct TestOutcome {
    pub result: AssessmentResult,
    pub finished: bool,
    pub notifications: Vec<RuntimeNotification>,
}

/// Drive a test session through every part, item by item.
pub fn run_test(
    package: &AssessmentPackage,
    identifier: &str,
    settings: EngineSettings,
    run: &RunFile,
) -> Result<TestOutcome, EvalError> {
    let mut clock = Clock::start();
    let mut session = package.test_session(identifier, settings)?;
    session.initialize()?;
    session.enter_test(clock.tick())?;

    while session.has_more_test_parts()? {
        session.enter_next_test_part(clock.tick())?;
        while session.has_more_items()? {
            let entered = session
                .enter_next_item(clock.tick())?
                .map(|e| e.item_ref.identifier.clone());
            let Some(item_ref) = entered else { break };
            for submission in run
                .submissions
                .iter()
                .filter(|s| s.item.as_deref() == Some(item_ref.as_str()))
            {
                let outcome = session.submit_item(&submission.responses, clock.tick())?;
                if !outcome.processed {
                    tracing::debug!(item = %item_ref, "submission not processed");
                }
            }
        }
        session.end_test_part(clock.tick())?;
        if session.state().finished {
            break;
        }
    }

    Ok(TestOutcome {
        result: session.compute_assessment_result(clock.tick()),
        finished: session.state().finished,
        notifications: session.all_notifications().all().to_vec(),
    })
}
