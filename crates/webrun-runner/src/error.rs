//! Error taxonomy of a run.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use webrun_engine::EngineError;

/// Errors that end a run phase.
///
/// `Configuration` and `Preparation` stop the process before a run record
/// exists. Every other variant is downgraded into the record's `error` field.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Missing required environment variables: {}", .missing.join(", "))]
    Configuration { missing: Vec<&'static str> },

    #[error("Failed to create directory {}: {source}", .path.display())]
    Preparation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to register tool '{tool}': {source}")]
    ToolRegistration {
        tool: String,
        #[source]
        source: EngineError,
    },

    /// Carries the engine's message unchanged.
    #[error(transparent)]
    Generation(EngineError),

    #[error("Failed to write workflow definition {}: {source}", .path.display())]
    WorkflowArtifact {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Carries the engine's message unchanged.
    #[error(transparent)]
    Execution(EngineError),

    #[error("Failed to write run record {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Run task aborted: {0}")]
    Panicked(String),
}

/// Side-channel artifact failures. Logged where they happen, never fatal.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Screenshot payload is empty")]
    Empty,

    #[error("Screenshot payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Failed to write screenshot {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Final observation failed: {0}")]
    Tool(String),
}
