//! Bridges engine execution hooks into the recorder.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};
use webrun_core::layout::FINAL_SCREENSHOT_NAME;
use webrun_core::{FinalState, StepRecord};
use webrun_engine::{
    EngineError, ScreenshotEvent, ToolInvoker, ToolResult, WorkflowCallback, BROWSER_USE_TOOL,
    FINAL_SCREENSHOT_ACTION,
};

use crate::error::ArtifactError;
use crate::recorder::SharedRecorder;
use crate::screenshots::ScreenshotCollector;

/// Records per-step screenshots and the final observation of a workflow.
///
/// Hooks never fail the run: capture problems are logged and the hook still
/// returns `Ok`. Hook bodies are serialized, so record mutations happen in
/// arrival order.
pub struct ExecutionCallbackAdapter {
    recorder: SharedRecorder,
    collector: Arc<ScreenshotCollector>,
    tools: Arc<dyn ToolInvoker>,
    hook_lock: Mutex<()>,
}

impl ExecutionCallbackAdapter {
    pub fn new(
        recorder: SharedRecorder,
        collector: Arc<ScreenshotCollector>,
        tools: Arc<dyn ToolInvoker>,
    ) -> Self {
        Self {
            recorder,
            collector,
            tools,
            hook_lock: Mutex::new(()),
        }
    }

    async fn final_observation(&self) -> Result<ToolResult, ArtifactError> {
        let result = self
            .tools
            .invoke_tool(BROWSER_USE_TOOL, json!({ "action": FINAL_SCREENSHOT_ACTION }))
            .await
            .map_err(|e| ArtifactError::Tool(e.to_string()))?;

        if !result.success {
            let reason = result
                .error
                .unwrap_or_else(|| "tool reported failure".to_string());
            return Err(ArtifactError::Tool(reason));
        }
        Ok(result)
    }
}

#[async_trait]
impl WorkflowCallback for ExecutionCallbackAdapter {
    async fn on_screenshot(&self, event: ScreenshotEvent) -> Result<(), EngineError> {
        let _hook = self.hook_lock.lock().await;

        let timestamp = event.timestamp.unwrap_or_else(Utc::now);
        let captured = self
            .collector
            .capture(
                event.step_index,
                &event.image,
                event.action.as_deref(),
                timestamp,
            )
            .await;

        let mut recorder = self.recorder.lock().await;
        let screenshot = captured.map(|shot| {
            let id = shot.id.clone();
            recorder.add_screenshot(shot);
            id
        });
        recorder.add_step(StepRecord {
            index: event.step_index,
            action: event.action,
            screenshot,
            timestamp,
        });
        Ok(())
    }

    async fn after_workflow(&self) -> Result<(), EngineError> {
        let _hook = self.hook_lock.lock().await;
        info!("Taking final screenshot of workflow state");

        let result = match self.final_observation().await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Error capturing final screenshot");
                return Ok(());
            }
        };

        let captured_at = Utc::now();
        let captured = match result.image.as_deref() {
            Some(image) => {
                self.collector
                    .capture_named(
                        FINAL_SCREENSHOT_NAME,
                        image,
                        Some(FINAL_SCREENSHOT_ACTION),
                        captured_at,
                    )
                    .await
            }
            None => None,
        };

        let mut recorder = self.recorder.lock().await;
        let screenshot = captured.map(|shot| {
            let id = shot.id.clone();
            recorder.add_screenshot(shot);
            id
        });
        recorder.set_final_state(FinalState {
            screenshot,
            elements: result.text,
            captured_at,
        });
        info!("Final screenshot captured");
        Ok(())
    }
}
