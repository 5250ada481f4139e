//! Type definitions for the engine contract and its JSON-lines wire protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Name of the browser automation tool.
pub const BROWSER_USE_TOOL: &str = "browser_use";

/// `browser_use` action that returns a screenshot plus element text without
/// extracting interactive elements.
pub const FINAL_SCREENSHOT_ACTION: &str = "screenshot_no_extract_element";

/// A workflow generated by the engine. Opaque beyond its JSON definition.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowHandle {
    definition: Value,
}

impl WorkflowHandle {
    pub fn new(definition: Value) -> Self {
        Self { definition }
    }

    /// The engine's workflow definition.
    pub fn definition(&self) -> &Value {
        &self.definition
    }

    /// Workflow id, when the engine assigns one.
    pub fn id(&self) -> Option<&str> {
        self.definition.get("id").and_then(Value::as_str)
    }
}

/// Outcome of a successful workflow execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Whatever the workflow returned.
    pub payload: Value,
}

/// Result of a direct tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,

    /// Encoded image, usually a `data:image/...;base64,` URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-step screenshot notification delivered during execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotEvent {
    pub step_index: u32,

    /// Action that produced the screenshot (e.g. `navigate`).
    #[serde(default)]
    pub action: Option<String>,

    /// Encoded image payload.
    pub image: String,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Browser viewport size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Launch options for the browser tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserOptions {
    pub headless: bool,
    pub args: Vec<String>,
    pub default_viewport: Viewport,
}

impl BrowserOptions {
    /// Container-friendly defaults: no sandbox, 1280x720 viewport.
    pub fn new(headless: bool) -> Self {
        Self {
            headless,
            args: vec!["--no-sandbox".to_string()],
            default_viewport: Viewport {
                width: 1280,
                height: 720,
            },
        }
    }
}

/// A tool the engine should make available to generated workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub options: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, options: Value) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }

    /// The browser automation tool with the given launch options.
    pub fn browser_use(options: BrowserOptions) -> Self {
        Self::new(BROWSER_USE_TOOL, json!({ "browserOptions": options }))
    }
}

/// Request sent to the engine process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineRequest {
    RegisterTool { tool: ToolSpec },
    Generate { prompt: String },
    Execute { workflow: Value },
    InvokeTool { name: String, args: Value },
    Shutdown,
}

impl EngineRequest {
    /// Short name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegisterTool { .. } => "register_tool",
            Self::Generate { .. } => "generate",
            Self::Execute { .. } => "execute",
            Self::InvokeTool { .. } => "invoke_tool",
            Self::Shutdown => "shutdown",
        }
    }
}

/// A request with its correlation id, as written to the engine's stdin.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    pub request_id: u64,
    #[serde(flatten)]
    pub request: EngineRequest,
}

/// Message read from the engine process's stdout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineMessage {
    /// Request accepted with no payload.
    Ack { request_id: u64 },

    /// Generated workflow.
    Workflow { request_id: u64, workflow: Value },

    /// Per-step screenshot hook.
    Screenshot(ScreenshotEvent),

    /// Engine-side log line.
    Log {
        #[serde(default)]
        level: Option<String>,
        message: String,
    },

    /// Terminal result of an `execute` request.
    Result {
        request_id: u64,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },

    /// Result of an `invoke_tool` request.
    ToolResult {
        request_id: u64,
        success: bool,
        #[serde(default)]
        image: Option<String>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },

    /// Request failed inside the engine.
    Error {
        #[serde(default)]
        request_id: Option<u64>,
        message: String,
    },

    /// Unknown message type (fallback).
    #[serde(untagged)]
    Unknown(Value),
}

impl EngineMessage {
    /// Correlation id, for messages that answer a request.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Self::Ack { request_id }
            | Self::Workflow { request_id, .. }
            | Self::Result { request_id, .. }
            | Self::ToolResult { request_id, .. } => Some(*request_id),
            Self::Error { request_id, .. } => *request_id,
            Self::Screenshot(_) | Self::Log { .. } | Self::Unknown(_) => None,
        }
    }
}
