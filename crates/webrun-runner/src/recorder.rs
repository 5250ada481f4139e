//! Result recorder: owns the run record from start to finalization.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use webrun_core::{CoreError, FinalState, Outcome, RunId, RunRecord, ScreenshotRef, StepRecord, TaskId};

/// Recorder shared between the orchestrator and the execution hooks.
pub type SharedRecorder = Arc<Mutex<ResultRecorder>>;

/// Accumulates observations into a [`RunRecord`].
///
/// The terminal outcome can be set once; later attempts are rejected and the
/// first outcome stands.
#[derive(Debug)]
pub struct ResultRecorder {
    record: RunRecord,
}

impl ResultRecorder {
    /// Begin a record with a freshly generated run id.
    pub fn start(task_id: TaskId, task_prompt: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self::with_run_id(task_id, RunId::generate(), task_prompt, start_time)
    }

    pub fn with_run_id(
        task_id: TaskId,
        run_id: RunId,
        task_prompt: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            record: RunRecord::new(task_id, run_id, task_prompt, start_time),
        }
    }

    /// Wrap this recorder for sharing across tasks.
    pub fn shared(self) -> SharedRecorder {
        Arc::new(Mutex::new(self))
    }

    pub fn task_id(&self) -> &TaskId {
        &self.record.task_id
    }

    pub fn run_id(&self) -> &RunId {
        &self.record.run_id
    }

    pub fn is_terminal(&self) -> bool {
        self.record.is_terminal()
    }

    pub fn record_success(&mut self, payload: Value, end_time: DateTime<Utc>) -> Result<(), CoreError> {
        self.record.finish(Outcome::Success(payload), end_time)
    }

    /// Record a failure. A blank message is replaced so the `error` field is
    /// never empty.
    pub fn record_failure(&mut self, message: impl Into<String>, end_time: DateTime<Utc>) -> Result<(), CoreError> {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "Unknown error".to_string();
        }
        self.record.finish(Outcome::Failure(message), end_time)
    }

    pub fn add_screenshot(&mut self, screenshot: ScreenshotRef) -> bool {
        self.record.add_screenshot(screenshot)
    }

    pub fn add_step(&mut self, step: StepRecord) {
        self.record.add_step(step);
    }

    pub fn set_final_state(&mut self, state: FinalState) {
        self.record.final_state = Some(state);
    }

    /// Add scanned screenshots not already tracked, then restore capture
    /// order. Returns how many were added.
    pub fn merge_screenshots(&mut self, scanned: impl IntoIterator<Item = ScreenshotRef>) -> usize {
        let added = scanned
            .into_iter()
            .filter(|s| self.record.add_screenshot(s.clone()))
            .count();
        self.record.sort_screenshots();
        added
    }

    /// Copy of the record as it stands.
    pub fn snapshot(&self) -> RunRecord {
        self.record.clone()
    }
}
