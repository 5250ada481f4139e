//! Scripted engine for exercising the runner without a subprocess.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use webrun_engine::{
    AgentEngine, EngineError, ExecutionResult, ScreenshotEvent, ToolInvoker, ToolResult, ToolSpec,
    WorkflowCallback, WorkflowHandle,
};

use crate::config::{Args, TaskConfig};

pub const PNG: &str = "data:image/png;base64,iVBORw0KGgo=";
pub const JPEG: &str = "data:image/jpeg;base64,/9j/4AAQ";

/// Engine whose every answer is set up front.
pub struct MockEngine {
    register: Result<(), String>,
    generate: Result<Value, String>,
    steps: Vec<ScreenshotEvent>,
    side_files: Vec<(PathBuf, Vec<u8>)>,
    execute: Result<Value, String>,
    panic_on_execute: bool,
    final_tool: Result<ToolResult, String>,
    calls: Mutex<Vec<String>>,
}

impl MockEngine {
    /// An engine that succeeds with `"done"` and no steps.
    pub fn new() -> Self {
        Self {
            register: Ok(()),
            generate: Ok(json!({ "id": "wf-1", "name": "open example.com" })),
            steps: Vec::new(),
            side_files: Vec::new(),
            execute: Ok(json!("done")),
            panic_on_execute: false,
            final_tool: Ok(ToolResult {
                success: true,
                image: None,
                text: Some("<body></body>".into()),
                error: None,
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_register(mut self, register: Result<(), String>) -> Self {
        self.register = register;
        self
    }

    pub fn with_generate(mut self, generate: Result<Value, String>) -> Self {
        self.generate = generate;
        self
    }

    pub fn with_step(mut self, step_index: u32, image: &str) -> Self {
        self.steps.push(ScreenshotEvent {
            step_index,
            action: Some(format!("action_{}", step_index)),
            image: image.to_string(),
            timestamp: None,
        });
        self
    }

    /// A file the engine writes directly while executing.
    pub fn with_side_file(mut self, path: PathBuf, bytes: &[u8]) -> Self {
        self.side_files.push((path, bytes.to_vec()));
        self
    }

    pub fn with_execute(mut self, execute: Result<Value, String>) -> Self {
        self.execute = execute;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_execute = true;
        self
    }

    pub fn with_final_tool(mut self, final_tool: Result<ToolResult, String>) -> Self {
        self.final_tool = final_tool;
        self
    }

    /// Names of the engine operations called so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn note(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl ToolInvoker for MockEngine {
    async fn invoke_tool(&self, name: &str, _args: Value) -> Result<ToolResult, EngineError> {
        self.note(&format!("invoke_tool:{}", name));
        self.final_tool.clone().map_err(EngineError::Failed)
    }
}

#[async_trait]
impl AgentEngine for MockEngine {
    async fn register_tool(&self, tool: ToolSpec) -> Result<(), EngineError> {
        self.note(&format!("register_tool:{}", tool.name));
        self.register.clone().map_err(EngineError::Failed)
    }

    async fn generate_workflow(&self, _prompt: &str) -> Result<WorkflowHandle, EngineError> {
        self.note("generate_workflow");
        self.generate
            .clone()
            .map(WorkflowHandle::new)
            .map_err(EngineError::Failed)
    }

    async fn execute_workflow(
        &self,
        _workflow: &WorkflowHandle,
        callback: Arc<dyn WorkflowCallback>,
    ) -> Result<ExecutionResult, EngineError> {
        self.note("execute_workflow");
        for step in &self.steps {
            callback.on_screenshot(step.clone()).await?;
        }
        for (path, bytes) in &self.side_files {
            std::fs::write(path, bytes).map_err(EngineError::Io)?;
        }
        if self.panic_on_execute {
            panic!("engine crashed mid-workflow");
        }
        let outcome = self.execute.clone();
        callback.after_workflow().await?;
        outcome
            .map(|payload| ExecutionResult { payload })
            .map_err(EngineError::Failed)
    }
}

/// A validated config rooted at `results_dir`.
pub fn config_in(results_dir: PathBuf) -> Arc<TaskConfig> {
    let args = Args {
        task_id: Some("T1".into()),
        task_prompt: Some("open example.com and report the title".into()),
        results_dir,
        api_key: Some("sk-test".into()),
        base_url: Some("https://api.example.com".into()),
        debug: false,
        headless: true,
        engine_command: "agent-engine".into(),
        engine_args: vec![],
    };
    match TaskConfig::from_args(args) {
        Ok(config) => Arc::new(config),
        Err(e) => panic!("test config invalid: {}", e),
    }
}
