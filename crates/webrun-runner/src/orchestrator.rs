//! Run orchestrator.
//!
//! Sequences one run: prepare the results directory, register the browser
//! tool, generate the workflow and save its definition, instrument execution
//! with the hook adapter, execute, then finalize and persist the record.
//! The generate-to-execute phases run on their own task so a panic inside the
//! engine ends up in the record instead of taking the process down.

use std::io;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, error, info};
use webrun_core::RunRecord;
use webrun_engine::{AgentEngine, BrowserOptions, ToolInvoker, ToolSpec};

use crate::adapter::ExecutionCallbackAdapter;
use crate::config::TaskConfig;
use crate::error::RunnerError;
use crate::persist::{write_atomic, write_json_atomic};
use crate::recorder::{ResultRecorder, SharedRecorder};
use crate::screenshots::ScreenshotCollector;

/// What a finished run left behind.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The terminal record, as persisted (or as it would have been).
    pub record: RunRecord,
    /// Whether `task_result.json` was written.
    pub persisted: bool,
}

impl RunReport {
    /// 0 exactly when the record carries a success payload.
    pub fn exit_code(&self) -> i32 {
        self.record.exit_code()
    }
}

/// Drives one task through an [`AgentEngine`].
pub struct RunOrchestrator<E> {
    config: Arc<TaskConfig>,
    engine: Arc<E>,
}

impl<E: AgentEngine + 'static> RunOrchestrator<E> {
    pub fn new(config: Arc<TaskConfig>, engine: Arc<E>) -> Self {
        Self { config, engine }
    }

    /// Execute the run.
    ///
    /// Returns `Err` only when the results directory cannot be prepared.
    /// Every later failure is captured in the returned record.
    pub async fn run(&self) -> Result<RunReport, RunnerError> {
        self.prepare().await?;

        let recorder = ResultRecorder::start(
            self.config.task_id.clone(),
            self.config.task_prompt.clone(),
            Utc::now(),
        )
        .shared();
        let collector = Arc::new(ScreenshotCollector::new(self.config.layout().screenshots_dir()));

        {
            let rec = recorder.lock().await;
            info!(task_id = %rec.task_id(), run_id = %rec.run_id(), "Run started");
        }

        let phases = tokio::spawn(drive(
            self.config.clone(),
            self.engine.clone(),
            recorder.clone(),
            collector.clone(),
        ));
        let outcome = match phases.await {
            Ok(outcome) => outcome,
            Err(e) => Err(RunnerError::Panicked(e.to_string())),
        };

        self.finalize(&recorder, outcome).await;
        let (record, persisted) = self.persist(&recorder, &collector).await;

        Ok(RunReport { record, persisted })
    }

    async fn prepare(&self) -> Result<(), RunnerError> {
        for dir in self.config.layout().directories() {
            match fs::create_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => {}
                Err(source) => {
                    error!(path = %dir.display(), error = %source, "Failed to create results directory");
                    return Err(RunnerError::Preparation { path: dir, source });
                }
            }
        }
        debug!(root = %self.config.layout().root().display(), "Results directory ready");
        Ok(())
    }

    async fn finalize(&self, recorder: &SharedRecorder, outcome: Result<Value, RunnerError>) {
        let mut rec = recorder.lock().await;
        let end_time = Utc::now();

        let finished = match outcome {
            Ok(payload) => {
                info!(task_id = %rec.task_id(), "Task completed successfully");
                rec.record_success(payload, end_time)
            }
            Err(e) => {
                error!(task_id = %rec.task_id(), error = %e, "Task execution failed");
                rec.record_failure(e.to_string(), end_time)
            }
        };

        if let Err(e) = finished {
            error!(error = %e, "Run record already finalized");
        }
    }

    /// Merge screenshots found on disk, then write `task_result.json`.
    /// A write failure is logged, never raised.
    async fn persist(&self, recorder: &SharedRecorder, collector: &ScreenshotCollector) -> (RunRecord, bool) {
        let scanned = collector.scan().await;
        let record = {
            let mut rec = recorder.lock().await;
            let added = rec.merge_screenshots(scanned);
            if added > 0 {
                debug!(added, "Merged screenshots found on disk");
            }
            rec.snapshot()
        };

        let path = self.config.layout().task_result();
        match write_json_atomic(&path, &record).await {
            Ok(()) => {
                info!(
                    path = %path.display(),
                    screenshots = record.screenshots.len(),
                    steps = record.steps.len(),
                    "Run record saved"
                );
                (record, true)
            }
            Err(source) => {
                let e = RunnerError::Persistence { path, source };
                error!(error = %e, "Failed to save run record");
                (record, false)
            }
        }
    }
}

/// Register, generate, save the definition, instrument, execute.
async fn drive<E: AgentEngine + 'static>(
    config: Arc<TaskConfig>,
    engine: Arc<E>,
    recorder: SharedRecorder,
    collector: Arc<ScreenshotCollector>,
) -> Result<Value, RunnerError> {
    let tool = ToolSpec::browser_use(BrowserOptions::new(config.headless));
    let tool_name = tool.name.clone();
    engine
        .register_tool(tool)
        .await
        .map_err(|source| RunnerError::ToolRegistration {
            tool: tool_name,
            source,
        })?;

    info!(task_id = %config.task_id, "Generating workflow");
    let workflow = engine
        .generate_workflow(&config.task_prompt)
        .await
        .map_err(RunnerError::Generation)?;

    let path = config.layout().workflow();
    let definition = engine.serialize_workflow(&workflow);
    write_atomic(&path, definition.as_bytes())
        .await
        .map_err(|source| RunnerError::WorkflowArtifact {
            path: path.clone(),
            source,
        })?;
    info!(path = %path.display(), workflow_id = ?workflow.id(), "Workflow definition saved");

    let tools: Arc<dyn ToolInvoker> = engine.clone();
    let adapter = Arc::new(ExecutionCallbackAdapter::new(recorder, collector, tools));

    info!("Executing workflow");
    let result = engine
        .execute_workflow(&workflow, adapter)
        .await
        .map_err(RunnerError::Execution)?;

    Ok(result.payload)
}
