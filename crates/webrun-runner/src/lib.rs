//! WebRun Task Runner Library
//!
//! Drives an agent engine through one browser-automation task and makes the
//! outcome durable: a `task_result.json` record is written on every path that
//! gets past configuration and directory preparation, together with the
//! workflow definition and any screenshots captured along the way.
//!
//! # Architecture
//!
//! ```text
//! TaskConfig → RunOrchestrator ─ generate ─ instrument ─ execute ─┐
//!                  │                              │               │
//!                  │                 ExecutionCallbackAdapter     │
//!                  │                   │                │         │
//!                  │           ResultRecorder   ScreenshotCollector
//!                  └──────────── finalize ─ persist ◄─────────────┘
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod json_output;
pub mod orchestrator;
pub mod persist;
pub mod recorder;
pub mod screenshots;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::ExecutionCallbackAdapter;
pub use config::{Args, TaskConfig};
pub use error::{ArtifactError, RunnerError};
pub use orchestrator::{RunOrchestrator, RunReport};
pub use recorder::{ResultRecorder, SharedRecorder};
pub use screenshots::ScreenshotCollector;
