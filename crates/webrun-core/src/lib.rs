//! WebRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - An async runtime
//! - The filesystem
//! - The agent engine
//!
//! All types here describe what a single browser-automation run produced.

pub mod error;
pub mod ids;
pub mod layout;
pub mod record;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{RunId, TaskId};
pub use record::{FinalState, Outcome, RunRecord, ScreenshotRef, StepRecord};
