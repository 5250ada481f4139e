//! Fixed names inside a results directory.

use std::path::{Path, PathBuf};

/// Terminal run record.
pub const TASK_RESULT_FILE: &str = "task_result.json";

/// Serialized workflow definition, written before execution.
pub const WORKFLOW_FILE: &str = "workflow.json";

/// Judge verdict written by the evaluator.
pub const EVAL_RESULT_FILE: &str = "eval_result.json";

/// Screenshot subdirectory.
pub const SCREENSHOTS_DIR: &str = "screenshots";

/// Log subdirectory.
pub const LOGS_DIR: &str = "logs";

/// Engine stderr capture inside [`LOGS_DIR`].
pub const ENGINE_LOG_FILE: &str = "engine.log";

/// Base name of the end-of-workflow screenshot.
pub const FINAL_SCREENSHOT_NAME: &str = "final_screenshot";

/// Paths of every artifact under one results directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsLayout {
    root: PathBuf,
}

impl ResultsLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.root.join(SCREENSHOTS_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn engine_log(&self) -> PathBuf {
        self.logs_dir().join(ENGINE_LOG_FILE)
    }

    pub fn task_result(&self) -> PathBuf {
        self.root.join(TASK_RESULT_FILE)
    }

    pub fn workflow(&self) -> PathBuf {
        self.root.join(WORKFLOW_FILE)
    }

    pub fn eval_result(&self) -> PathBuf {
        self.root.join(EVAL_RESULT_FILE)
    }

    /// Directories that must exist before a run starts, parents first.
    pub fn directories(&self) -> [PathBuf; 3] {
        [self.root.clone(), self.screenshots_dir(), self.logs_dir()]
    }

    /// Path recorded in a [`ScreenshotRef`](crate::ScreenshotRef): relative
    /// to the results root so the directory can be moved as a unit.
    pub fn screenshot_rel_path(file_name: &str) -> String {
        format!("{}/{}", SCREENSHOTS_DIR, file_name)
    }
}
