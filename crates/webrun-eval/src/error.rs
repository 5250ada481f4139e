//! Error types for evaluation and scoring.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use webrun_runner::RunnerError;

/// Errors that can occur while evaluating or scoring results.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Task directory {} does not exist", .0.display())]
    TaskDirMissing(PathBuf),

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{}:{line}: invalid task: {source}", .path.display())]
    TaskList {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the judge endpoint after retries.
    #[error("Judge API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Judge response had no content")]
    EmptyResponse,

    /// The run could not start (bad configuration or unwritable directory).
    #[error(transparent)]
    Run(#[from] RunnerError),

    #[error("Batch aborted: {0}")]
    Batch(String),

    #[error("Missing required environment variable: {0}")]
    Configuration(&'static str),
}
