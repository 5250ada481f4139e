//! The run record: the structured, always-persisted summary of one task run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CoreError, RunId, TaskId};

/// Terminal outcome of a run. Flattened into the record as either a
/// `result` or an `error` key, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// Payload returned by the engine on success.
    #[serde(rename = "result")]
    Success(Value),
    /// Stringified failure.
    #[serde(rename = "error")]
    Failure(String),
}

impl Outcome {
    fn kind(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Failure(_) => "failure",
        }
    }
}

/// Reference to a screenshot stored under the results directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotRef {
    /// Stable identifier: the file name inside `screenshots/`.
    pub id: String,

    /// Path relative to the results directory.
    pub path: String,

    /// Action that produced the screenshot, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// When the image was captured (file mtime for scanned files).
    pub captured_at: DateTime<Utc>,
}

impl ScreenshotRef {
    pub fn new(id: impl Into<String>, path: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            action: None,
            captured_at,
        }
    }

    /// Builder method to tag the screenshot with its action.
    pub fn with_action(mut self, action: Option<String>) -> Self {
        self.action = action;
        self
    }
}

/// One engine step observed through the per-step hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step index as reported by the engine.
    pub index: u32,

    /// Action name, if the engine supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Identifier of the screenshot captured for this step. Absent when the
    /// capture failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,

    pub timestamp: DateTime<Utc>,
}

/// Final observation of the automated surface, taken after the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,

    /// Textual element dump returned alongside the screenshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<String>,

    pub captured_at: DateTime<Utc>,
}

/// The evolving result document of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub task_id: TaskId,

    pub run_id: RunId,

    pub start_time: DateTime<Utc>,

    /// Set only when the record is finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,

    pub task_prompt: String,

    #[serde(flatten)]
    outcome: Option<Outcome>,

    /// Ordered by capture time, unique by `id`.
    #[serde(default)]
    pub screenshots: Vec<ScreenshotRef>,

    #[serde(default)]
    pub steps: Vec<StepRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_state: Option<FinalState>,
}

impl RunRecord {
    /// Create a record with only the start of the run populated.
    pub fn new(
        task_id: TaskId,
        run_id: RunId,
        task_prompt: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            run_id,
            start_time,
            end_time: None,
            duration_ms: None,
            task_prompt: task_prompt.into(),
            outcome: None,
            screenshots: Vec::new(),
            steps: Vec::new(),
            final_state: None,
        }
    }

    /// Terminal outcome, if the record has been finalized.
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Success payload, if any.
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Some(Outcome::Success(value)) => Some(value),
            _ => None,
        }
    }

    /// Failure message, if any.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Some(Outcome::Failure(message)) => Some(message),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Some(Outcome::Success(_)))
    }

    /// Process exit status for this record: 0 only for a success payload.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// Set the terminal outcome and end timestamp.
    ///
    /// Fails if an outcome is already present; the first outcome is kept.
    pub fn finish(&mut self, outcome: Outcome, end_time: DateTime<Utc>) -> Result<(), CoreError> {
        if let Some(existing) = &self.outcome {
            return Err(CoreError::AlreadyFinalized(existing.kind()));
        }
        self.outcome = Some(outcome);
        self.end_time = Some(end_time);
        self.duration_ms = Some((end_time - self.start_time).num_milliseconds());
        Ok(())
    }

    /// Whether a screenshot with this identifier is already tracked.
    pub fn has_screenshot(&self, id: &str) -> bool {
        self.screenshots.iter().any(|s| s.id == id)
    }

    /// Append a screenshot reference. Returns false for a duplicate id.
    pub fn add_screenshot(&mut self, screenshot: ScreenshotRef) -> bool {
        if self.has_screenshot(&screenshot.id) {
            return false;
        }
        self.screenshots.push(screenshot);
        true
    }

    /// Re-establish capture-time order after merging scanned files.
    /// Stable, so equal timestamps keep arrival order.
    pub fn sort_screenshots(&mut self) {
        self.screenshots.sort_by_key(|s| s.captured_at);
    }

    pub fn add_step(&mut self, step: StepRecord) {
        self.steps.push(step);
    }
}
