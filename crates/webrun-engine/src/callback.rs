//! Hook surface the engine calls back into during workflow execution.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::types::ScreenshotEvent;

/// Handler trait for workflow execution hooks.
///
/// Implement this trait to observe a running workflow. The engine delivers
/// hooks serially and in the order they occur; an implementation never sees
/// two hooks at once from the same execution.
#[async_trait]
pub trait WorkflowCallback: Send + Sync {
    /// Called after a step produced a screenshot.
    async fn on_screenshot(&self, event: ScreenshotEvent) -> Result<(), EngineError>;

    /// Called once after the workflow finished, whether it succeeded or the
    /// engine reported an error.
    async fn after_workflow(&self) -> Result<(), EngineError>;
}
