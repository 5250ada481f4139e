//! Core domain errors.

use thiserror::Error;

/// Core domain errors for WebRun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The run record already carries a terminal outcome.
    #[error("Run record already finalized as {0}")]
    AlreadyFinalized(&'static str),
}
