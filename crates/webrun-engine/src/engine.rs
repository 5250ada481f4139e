//! The agent engine contract.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::callback::WorkflowCallback;
use crate::error::EngineError;
use crate::types::{ExecutionResult, ToolResult, ToolSpec, WorkflowHandle};

/// Direct access to an engine tool, outside of any workflow.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run a single tool call and return its raw result. A tool that ran but
    /// failed is `Ok` with `success == false`; `Err` means the call itself
    /// could not be made.
    async fn invoke_tool(&self, name: &str, args: Value) -> Result<ToolResult, EngineError>;
}

/// An LLM-driven engine that turns prompts into workflows and runs them.
#[async_trait]
pub trait AgentEngine: ToolInvoker {
    /// Make an automation capability available to generated workflows.
    async fn register_tool(&self, tool: ToolSpec) -> Result<(), EngineError>;

    /// Turn a natural-language prompt into a workflow.
    async fn generate_workflow(&self, prompt: &str) -> Result<WorkflowHandle, EngineError>;

    /// Execute a workflow, delivering hooks to `callback` as it runs.
    async fn execute_workflow(
        &self,
        workflow: &WorkflowHandle,
        callback: Arc<dyn WorkflowCallback>,
    ) -> Result<ExecutionResult, EngineError>;

    /// Release engine resources. The engine must not be used afterwards.
    async fn shutdown(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Persistable form of a workflow definition.
    fn serialize_workflow(&self, workflow: &WorkflowHandle) -> String {
        serde_json::to_string_pretty(workflow.definition())
            .unwrap_or_else(|_| workflow.definition().to_string())
    }
}
