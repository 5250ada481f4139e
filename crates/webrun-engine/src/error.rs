//! Error types for the agent engine contract.

use thiserror::Error;

/// Errors that can occur while talking to the agent engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine reported a failure. The message is the engine's own.
    #[error("{0}")]
    Failed(String),

    /// Failed to spawn the engine process.
    #[error("Failed to spawn engine process '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error on the engine's stdio.
    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine process closed its stdout.
    #[error("Engine process exited before responding to {0}")]
    ProcessExited(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unexpected message for the pending request.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
