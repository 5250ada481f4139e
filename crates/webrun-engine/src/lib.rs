//! Agent engine contract for WebRun
//!
//! This crate describes the external workflow engine that turns a prompt into
//! an executable browser workflow and runs it, and provides `ProcessEngine`,
//! a client that drives such an engine as a subprocess over JSON lines.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use webrun_engine::{AgentEngine, ProcessEngine, ToolSpec, BrowserOptions, WorkflowCallback};
//!
//! async fn run(callback: Arc<dyn WorkflowCallback>) -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ProcessEngine::new("agent-engine")
//!         .with_env("ANTHROPIC_API_KEY", "sk-...");
//!
//!     engine.register_tool(ToolSpec::browser_use(BrowserOptions::new(true))).await?;
//!     let workflow = engine.generate_workflow("open example.com").await?;
//!     let result = engine.execute_workflow(&workflow, callback).await?;
//!
//!     println!("Result: {}", result.payload);
//!     Ok(())
//! }
//! ```

mod callback;
mod engine;
mod error;
mod process;
mod types;

// Re-export main types
pub use callback::WorkflowCallback;
pub use engine::{AgentEngine, ToolInvoker};
pub use error::EngineError;
pub use process::ProcessEngine;
pub use types::{
    BrowserOptions, EngineMessage, EngineRequest, ExecutionResult, RequestEnvelope,
    ScreenshotEvent, ToolResult, ToolSpec, Viewport, WorkflowHandle, BROWSER_USE_TOOL,
    FINAL_SCREENSHOT_ACTION,
};
