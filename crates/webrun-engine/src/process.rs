//! Agent engine driven as a subprocess.
//!
//! The engine process reads one JSON request per line on stdin and writes
//! JSON messages on stdout. Stderr is treated as free-form logging.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, trace, warn};

use crate::callback::WorkflowCallback;
use crate::engine::{AgentEngine, ToolInvoker};
use crate::error::EngineError;
use crate::types::{
    EngineMessage, EngineRequest, ExecutionResult, RequestEnvelope, ToolResult, ToolSpec,
    WorkflowHandle,
};

/// How long `shutdown` waits for the process before killing it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Live stdio of a spawned engine process.
struct Connection {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl Connection {
    async fn send(&mut self, envelope: &RequestEnvelope) -> Result<(), EngineError> {
        let json = serde_json::to_string(envelope)?;
        debug!(
            request_id = envelope.request_id,
            request = envelope.request.kind(),
            json_len = json.len(),
            "Sending request to engine"
        );
        trace!("Sending to stdin: {}", json);

        self.stdin.write_all(json.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Read the next protocol message, consuming engine log lines and
    /// anything that fails to parse along the way.
    async fn next_message(&mut self, pending: &str) -> Result<EngineMessage, EngineError> {
        loop {
            let Some(line) = self.stdout.next_line().await? else {
                info!(pending = pending, "Engine stdout closed (EOF)");
                return Err(EngineError::ProcessExited(pending.to_string()));
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            trace!("Raw stdout: {}", trimmed);

            match serde_json::from_str::<EngineMessage>(trimmed) {
                Ok(EngineMessage::Log { level, message }) => {
                    log_engine_line(level.as_deref(), &message);
                }
                Ok(EngineMessage::Unknown(value)) => {
                    let full_json = serde_json::to_string(&value)
                        .unwrap_or_else(|_| "failed to serialize".to_string());
                    warn!(full_message = %full_json, "Received unknown engine message type");
                }
                Ok(message) => return Ok(message),
                Err(e) => {
                    warn!(
                        error = %e,
                        raw_len = trimmed.len(),
                        "Failed to parse engine message"
                    );
                    let preview: String = trimmed.chars().take(200).collect();
                    warn!(preview = %preview, "Message preview");
                }
            }
        }
    }
}

fn log_engine_line(level: Option<&str>, message: &str) {
    match level.unwrap_or("info") {
        "error" => error!(engine = true, "{}", message),
        "warn" | "warning" => warn!(engine = true, "{}", message),
        "debug" | "trace" => debug!(engine = true, "{}", message),
        _ => info!(engine = true, "{}", message),
    }
}

fn connected(slot: &mut Option<Connection>) -> Result<&mut Connection, EngineError> {
    slot.as_mut()
        .ok_or_else(|| EngineError::Protocol("engine process not running".to_string()))
}

fn unexpected(request: &str, message: EngineMessage) -> EngineError {
    match message {
        EngineMessage::Error { message, .. } => EngineError::Failed(message),
        other => EngineError::Protocol(format!("unexpected reply to {}: {:?}", request, other)),
    }
}

/// Forward the engine's stderr to tracing and, if configured, a log file.
async fn forward_stderr(stderr: ChildStderr, log_file: Option<PathBuf>) {
    let mut sink = match log_file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(&path).await {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Cannot open engine log file");
                None
            }
        },
        None => None,
    };

    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                warn!(stderr = %trimmed, "Engine stderr");

                let mut write_failed = false;
                if let Some(file) = sink.as_mut() {
                    let entry = format!("{}\n", trimmed);
                    if let Err(e) = file.write_all(entry.as_bytes()).await {
                        warn!(error = %e, "Engine log file write failed, disabling");
                        write_failed = true;
                    }
                }
                if write_failed {
                    sink = None;
                }
            }
            Ok(None) => break, // EOF
            Err(e) => {
                error!(error = %e, "Error reading engine stderr");
                break;
            }
        }
    }
}

/// Agent engine reached through a child process.
///
/// The process is spawned on first use and reused for every later request.
/// Requests are strictly sequential: one request is in flight at a time.
///
/// # Example
///
/// ```rust,no_run
/// use webrun_engine::{AgentEngine, ProcessEngine};
///
/// async fn run() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = ProcessEngine::new("agent-engine")
///         .with_arg("--stdio")
///         .with_env("ANTHROPIC_BASE_URL", "https://api.anthropic.com");
///
///     let workflow = engine.generate_workflow("open example.com").await?;
///     println!("{}", engine.serialize_workflow(&workflow));
///     engine.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct ProcessEngine {
    /// Executable to spawn.
    command: String,

    /// Arguments for the executable.
    args: Vec<String>,

    /// Additional environment variables.
    env_vars: Vec<(String, String)>,

    /// File that receives the engine's stderr.
    log_file: Option<PathBuf>,

    connection: Mutex<Option<Connection>>,

    next_request_id: AtomicU64,
}

impl ProcessEngine {
    /// Create an engine client for the given executable. Nothing is spawned
    /// until the first request.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env_vars: Vec::new(),
            log_file: None,
            connection: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Add a command-line argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add several command-line arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Append the engine's stderr to this file.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    fn spawn(&self) -> Result<Connection, EngineError> {
        info!(
            command = %self.command,
            args = ?self.args,
            "Spawning engine process"
        );

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| {
            error!(error = %source, command = %self.command, "Failed to spawn engine process");
            EngineError::Spawn {
                command: self.command.clone(),
                source,
            }
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Protocol("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Protocol("Failed to get stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Protocol("Failed to get stderr".to_string()))?;

        tokio::spawn(forward_stderr(stderr, self.log_file.clone()));

        info!(pid = ?child.id(), "Engine process spawned");
        Ok(Connection {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Lock the connection, spawning the process if needed.
    async fn connect(&self) -> Result<MutexGuard<'_, Option<Connection>>, EngineError> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawn()?);
        }
        Ok(guard)
    }

    /// Send a request and return the first message addressed to it.
    async fn round_trip(&self, request: EngineRequest) -> Result<EngineMessage, EngineError> {
        let kind = request.kind();
        let mut guard = self.connect().await?;
        let conn = connected(&mut guard)?;

        let request_id = self.next_id();
        conn.send(&RequestEnvelope {
            request_id,
            request,
        })
        .await?;

        loop {
            let message = conn.next_message(kind).await?;
            let addressed = match message.request_id() {
                Some(id) => id == request_id,
                None => matches!(message, EngineMessage::Error { .. }),
            };
            if addressed {
                return Ok(message);
            }
            warn!(
                request = kind,
                request_id = request_id,
                message = ?message,
                "Ignoring message not addressed to pending request"
            );
        }
    }
}

#[async_trait]
impl ToolInvoker for ProcessEngine {
    async fn invoke_tool(&self, name: &str, args: Value) -> Result<ToolResult, EngineError> {
        info!(tool = %name, "Invoking engine tool");
        let reply = self
            .round_trip(EngineRequest::InvokeTool {
                name: name.to_string(),
                args,
            })
            .await?;

        match reply {
            EngineMessage::ToolResult {
                success,
                image,
                text,
                error,
                ..
            } => Ok(ToolResult {
                success,
                image,
                text,
                error,
            }),
            other => Err(unexpected("invoke_tool", other)),
        }
    }
}

#[async_trait]
impl AgentEngine for ProcessEngine {
    async fn register_tool(&self, tool: ToolSpec) -> Result<(), EngineError> {
        info!(tool = %tool.name, "Registering tool with engine");
        match self.round_trip(EngineRequest::RegisterTool { tool }).await? {
            EngineMessage::Ack { .. } => Ok(()),
            other => Err(unexpected("register_tool", other)),
        }
    }

    async fn generate_workflow(&self, prompt: &str) -> Result<WorkflowHandle, EngineError> {
        info!(prompt_len = prompt.len(), "Requesting workflow generation");
        let reply = self
            .round_trip(EngineRequest::Generate {
                prompt: prompt.to_string(),
            })
            .await?;

        match reply {
            EngineMessage::Workflow { workflow, .. } => {
                let handle = WorkflowHandle::new(workflow);
                info!(workflow_id = ?handle.id(), "Workflow generated");
                Ok(handle)
            }
            other => Err(unexpected("generate", other)),
        }
    }

    async fn execute_workflow(
        &self,
        workflow: &WorkflowHandle,
        callback: Arc<dyn WorkflowCallback>,
    ) -> Result<ExecutionResult, EngineError> {
        info!(workflow_id = ?workflow.id(), "Executing workflow");

        // The connection lock is released before `after_workflow` so the hook
        // can issue its own tool call.
        let outcome = {
            let mut guard = self.connect().await?;
            let conn = connected(&mut guard)?;

            let request_id = self.next_id();
            conn.send(&RequestEnvelope {
                request_id,
                request: EngineRequest::Execute {
                    workflow: workflow.definition().clone(),
                },
            })
            .await?;

            let mut hook_count = 0u64;
            loop {
                match conn.next_message("execute").await? {
                    EngineMessage::Screenshot(event) => {
                        hook_count += 1;
                        debug!(
                            hook_num = hook_count,
                            step = event.step_index,
                            action = ?event.action,
                            "Dispatching screenshot hook"
                        );
                        if let Err(e) = callback.on_screenshot(event).await {
                            warn!(error = %e, "Screenshot hook failed");
                        }
                    }
                    EngineMessage::Result {
                        request_id: id,
                        result,
                        error,
                    } if id == request_id => {
                        info!(
                            hooks = hook_count,
                            is_error = error.is_some(),
                            "Workflow execution finished"
                        );
                        // A completed execution must carry a payload or an error.
                        break match (error, result) {
                            (Some(message), _) => Err(EngineError::Failed(message)),
                            (None, Some(payload)) => Ok(ExecutionResult { payload }),
                            (None, None) => Err(EngineError::Protocol(
                                "execute result carried neither result nor error".to_string(),
                            )),
                        };
                    }
                    EngineMessage::Error {
                        request_id: id,
                        message,
                    } if id.map_or(true, |id| id == request_id) => {
                        warn!(error = %message, "Engine reported execution error");
                        break Err(EngineError::Failed(message));
                    }
                    other => {
                        warn!(message = ?other, "Ignoring unexpected message during execution");
                    }
                }
            }
        };

        if let Err(e) = callback.after_workflow().await {
            warn!(error = %e, "after_workflow hook failed");
        }

        outcome
    }

    /// Ask the engine process to exit and wait for it.
    ///
    /// The process is killed if it has not exited within a short grace period.
    async fn shutdown(&self) -> Result<(), EngineError> {
        let mut guard = self.connection.lock().await;
        let Some(mut conn) = guard.take() else {
            return Ok(());
        };

        let envelope = RequestEnvelope {
            request_id: self.next_id(),
            request: EngineRequest::Shutdown,
        };
        if let Err(e) = conn.send(&envelope).await {
            debug!(error = %e, "Shutdown request not delivered");
        }
        drop(conn.stdin);

        match tokio::time::timeout(SHUTDOWN_GRACE, conn.child.wait()).await {
            Ok(status) => {
                let status = status?;
                info!(exit_code = ?status.code(), "Engine process exited");
            }
            Err(_) => {
                warn!("Engine process did not exit in time, killing");
                conn.child.kill().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScreenshotEvent;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingCallback {
        screenshots: StdMutex<Vec<ScreenshotEvent>>,
        after_calls: StdMutex<u32>,
    }

    #[async_trait]
    impl WorkflowCallback for RecordingCallback {
        async fn on_screenshot(&self, event: ScreenshotEvent) -> Result<(), EngineError> {
            self.screenshots.lock().unwrap().push(event);
            Ok(())
        }

        async fn after_workflow(&self) -> Result<(), EngineError> {
            *self.after_calls.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn scripted(script: &str) -> ProcessEngine {
        ProcessEngine::new("sh").with_arg("-c").with_arg(script)
    }

    #[test]
    fn test_engine_builder() {
        let engine = ProcessEngine::new("agent-engine")
            .with_args(["--stdio", "--quiet"])
            .with_env("ANTHROPIC_API_KEY", "test-key")
            .with_log_file("/tmp/engine.log");

        assert_eq!(engine.command, "agent-engine");
        assert_eq!(engine.args, vec!["--stdio", "--quiet"]);
        assert_eq!(engine.env_vars.len(), 1);
        assert_eq!(engine.log_file, Some(PathBuf::from("/tmp/engine.log")));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let engine = ProcessEngine::new("/nonexistent/agent-engine");
        let err = engine.generate_workflow("x").await.unwrap_err();
        assert!(matches!(err, EngineError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generate_round_trip() {
        let engine = scripted(
            r#"read line; echo '{"type":"log","message":"thinking"}'; echo '{"type":"workflow","request_id":1,"workflow":{"id":"wf-1","nodes":[]}}'"#,
        );
        let handle = engine.generate_workflow("open example.com").await.unwrap();
        assert_eq!(handle.id(), Some("wf-1"));
        assert!(engine.serialize_workflow(&handle).contains("\"wf-1\""));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_error_reply() {
        let engine = scripted(
            r#"read line; echo '{"type":"error","request_id":1,"message":"model unavailable"}'"#,
        );
        let err = engine.generate_workflow("x").await.unwrap_err();
        assert_eq!(err.to_string(), "model unavailable");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_exit_before_reply() {
        let engine = scripted("read line; exit 0");
        let err = engine.generate_workflow("x").await.unwrap_err();
        assert!(matches!(err, EngineError::ProcessExited(ref r) if r == "generate"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_dispatches_hooks_in_order() {
        let engine = scripted(
            r#"read line
echo 'not json'
echo '{"type":"screenshot","step_index":1,"action":"navigate","image":"AAAA"}'
echo '{"type":"screenshot","step_index":2,"image":"BBBB"}'
echo '{"type":"result","request_id":1,"result":"done"}'"#,
        );
        let callback = Arc::new(RecordingCallback::default());
        let workflow = WorkflowHandle::new(serde_json::json!({"id": "wf"}));

        let result = engine
            .execute_workflow(&workflow, callback.clone())
            .await
            .unwrap();

        assert_eq!(result.payload, serde_json::json!("done"));
        let steps: Vec<u32> = callback
            .screenshots
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.step_index)
            .collect();
        assert_eq!(steps, vec![1, 2]);
        assert_eq!(*callback.after_calls.lock().unwrap(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_error_still_runs_after_hook() {
        let engine = scripted(
            r#"read line; echo '{"type":"result","request_id":1,"error":"tool timeout"}'"#,
        );
        let callback = Arc::new(RecordingCallback::default());
        let workflow = WorkflowHandle::new(serde_json::json!({}));

        let err = engine
            .execute_workflow(&workflow, callback.clone())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "tool timeout");
        assert_eq!(*callback.after_calls.lock().unwrap(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_empty_result_is_a_protocol_error() {
        for reply in [
            r#"{"type":"result","request_id":1}"#,
            r#"{"type":"result","request_id":1,"result":null}"#,
        ] {
            let engine = scripted(&format!("read line; echo '{}'", reply));
            let callback = Arc::new(RecordingCallback::default());
            let workflow = WorkflowHandle::new(serde_json::json!({}));

            let err = engine
                .execute_workflow(&workflow, callback.clone())
                .await
                .unwrap_err();

            assert!(matches!(err, EngineError::Protocol(_)), "reply {}", reply);
            assert_eq!(*callback.after_calls.lock().unwrap(), 1);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_transport_failure_skips_after_hook() {
        let engine = scripted("read line; exit 3");
        let callback = Arc::new(RecordingCallback::default());
        let workflow = WorkflowHandle::new(serde_json::json!({}));

        let err = engine
            .execute_workflow(&workflow, callback.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::ProcessExited(_)));
        assert_eq!(*callback.after_calls.lock().unwrap(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_tool_round_trip() {
        let engine = scripted(
            r#"read line; echo '{"type":"tool_result","request_id":1,"success":true,"image":"data:image/jpeg;base64,AAAA","text":"<body>"}'"#,
        );
        let result = engine
            .invoke_tool("browser_use", serde_json::json!({"action": "screenshot"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.text.as_deref(), Some("<body>"));
    }
}
