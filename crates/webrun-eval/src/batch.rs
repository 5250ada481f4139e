//! Batch runs over a task list.
//!
//! Every task gets its own results directory under a shared root. A task whose
//! directory already holds `task_result.json` is not run again, which makes an
//! interrupted batch resumable. After each task the running totals are written
//! to `experiment_results.json` in the root.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};
use webrun_core::layout::ResultsLayout;
use webrun_core::RunRecord;
use webrun_engine::AgentEngine;
use webrun_runner::persist::write_json_atomic;
use webrun_runner::{Args, RunOrchestrator, TaskConfig};

use crate::client::Judge;
use crate::error::EvalError;
use crate::evaluator::{answer_text, Evaluator};
use crate::verdict::{EvalRecord, Verdict};

/// Aggregate file written in the results root.
pub const EXPERIMENT_RESULTS_FILE: &str = "experiment_results.json";

/// Default number of tasks running at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// One line of a JSONL task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    /// Site the question is about, appended to the prompt when present.
    #[serde(default)]
    pub web: Option<String>,
    pub ques: String,
}

impl TaskSpec {
    pub fn prompt(&self) -> String {
        match &self.web {
            Some(web) => format!("{} on {}", self.ques, web),
            None => self.ques.clone(),
        }
    }
}

/// Read a JSONL task list. Blank lines are ignored.
pub async fn load_tasks(path: &Path) -> Result<Vec<TaskSpec>, EvalError> {
    let text = read_text(path).await?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|source| EvalError::TaskList {
                path: path.to_path_buf(),
                line: i + 1,
                source,
            })
        })
        .collect()
}

/// Read a JSON array of task ids to leave out of a batch.
pub async fn load_exclusions(path: &Path) -> Result<HashSet<String>, EvalError> {
    read_json(path).await
}

/// Drop excluded tasks, keeping the order of the rest.
pub fn exclude(tasks: Vec<TaskSpec>, excluded: &HashSet<String>) -> Vec<TaskSpec> {
    tasks
        .into_iter()
        .filter(|task| !excluded.contains(&task.id))
        .collect()
}

async fn read_text(path: &Path) -> Result<String, EvalError> {
    fs::read_to_string(path)
        .await
        .map_err(|source| EvalError::Read {
            path: path.to_path_buf(),
            source,
        })
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, EvalError> {
    let text = read_text(path).await?;
    serde_json::from_str(&text).map_err(|source| EvalError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Outcome of one task as it appears in the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub verdict: Verdict,
    pub steps: usize,
    pub duration_ms: Option<i64>,
    pub task_prompt: String,
    /// Textual result, or the error when the run failed.
    pub final_answer: String,
    pub judge_response: String,
    /// True when the run was found on disk instead of executed.
    pub resumed: bool,
}

impl TaskSummary {
    fn new(record: &RunRecord, eval: EvalRecord, resumed: bool) -> Self {
        let final_answer = match (record.result(), record.error()) {
            (Some(result), _) => answer_text(result),
            (None, Some(error)) => error.to_string(),
            (None, None) => String::new(),
        };
        Self {
            task_id: record.task_id.to_string(),
            verdict: eval.eval_result,
            steps: record.steps.len(),
            duration_ms: record.duration_ms,
            task_prompt: record.task_prompt.clone(),
            final_answer,
            judge_response: eval.judge_response,
            resumed,
        }
    }
}

/// Contents of `experiment_results.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub total_tasks: usize,
    pub total_success: usize,
    pub total_failed: usize,
    pub total_unknown: usize,
    pub all_tasks: Vec<TaskSummary>,
}

impl ExperimentResults {
    pub fn add(&mut self, summary: TaskSummary) {
        self.total_tasks += 1;
        match summary.verdict {
            Verdict::Success => self.total_success += 1,
            Verdict::Failed => self.total_failed += 1,
            Verdict::Unknown => self.total_unknown += 1,
        }
        self.all_tasks.push(summary);
    }

    /// `successes/finished`, e.g. `3/5`.
    pub fn success_rate(&self) -> String {
        format!("{}/{}", self.total_success, self.total_tasks)
    }

    fn ids_with(&self, verdict: Verdict) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .all_tasks
            .iter()
            .filter(|t| t.verdict == verdict)
            .map(|t| t.task_id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    fn log_summary(&self) {
        info!(
            successful = ?self.ids_with(Verdict::Success),
            failed = ?self.ids_with(Verdict::Failed),
            unknown = self.total_unknown,
            success_rate = %self.success_rate(),
            "Batch summary"
        );
    }
}

/// Runs many tasks through [`RunOrchestrator`], a bounded number at a time.
pub struct BatchRunner {
    base: Args,
    results_root: PathBuf,
    evaluator: Option<Evaluator<Arc<dyn Judge>>>,
    concurrency_limiter: Arc<Semaphore>,
    planned: AtomicUsize,
    results: Mutex<ExperimentResults>,
}

impl BatchRunner {
    /// `base` supplies every run setting except the task id, prompt and
    /// results directory, which come from each task.
    pub fn new(base: Args, results_root: impl Into<PathBuf>, max_concurrent: usize) -> Self {
        Self {
            base,
            results_root: results_root.into(),
            evaluator: None,
            concurrency_limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            planned: AtomicUsize::new(0),
            results: Mutex::new(ExperimentResults::default()),
        }
    }

    /// Builder method to judge finished runs.
    pub fn with_evaluator(mut self, evaluator: Evaluator<Arc<dyn Judge>>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn task_dir(&self, task: &TaskSpec) -> PathBuf {
        self.results_root.join(&task.id)
    }

    fn task_config(&self, task: &TaskSpec) -> Result<TaskConfig, EvalError> {
        let mut args = self.base.clone();
        args.task_id = Some(task.id.clone());
        args.task_prompt = Some(task.prompt());
        args.results_dir = self.task_dir(task);
        Ok(TaskConfig::from_args(args)?)
    }

    /// Run every task and return the final aggregate. A task that cannot
    /// start is logged and left out of the totals.
    pub async fn run_batch<E, F>(&self, tasks: Vec<TaskSpec>, factory: F) -> ExperimentResults
    where
        E: AgentEngine + 'static,
        F: Fn(&TaskConfig) -> Arc<E>,
    {
        self.planned.fetch_add(tasks.len(), Ordering::SeqCst);
        info!(
            tasks = tasks.len(),
            max_concurrent = self.concurrency_limiter.available_permits(),
            root = %self.results_root.display(),
            "Starting batch"
        );

        let factory = &factory;
        let futures: Vec<_> = tasks
            .into_iter()
            .map(|task| async move {
                if let Err(e) = self.run_task(&task, factory).await {
                    error!(task_id = %task.id, error = %e, "Task did not complete");
                }
            })
            .collect();
        futures::future::join_all(futures).await;

        let results = self.results.lock().await;
        results.log_summary();
        results.clone()
    }

    /// Run (or resume) one task, judge it and fold it into the aggregate.
    pub async fn run_task<E, F>(&self, task: &TaskSpec, factory: &F) -> Result<TaskSummary, EvalError>
    where
        E: AgentEngine + 'static,
        F: Fn(&TaskConfig) -> Arc<E>,
    {
        let _permit = self
            .concurrency_limiter
            .acquire()
            .await
            .map_err(|e| EvalError::Batch(format!("Failed to acquire permit: {}", e)))?;

        let layout = ResultsLayout::new(self.task_dir(task));
        let existing = layout.task_result();

        let (record, resumed) = if existing.exists() {
            info!(task_id = %task.id, "Result exists, skipping run");
            (read_json::<RunRecord>(&existing).await?, true)
        } else {
            info!(task_id = %task.id, "Running task");
            let config = Arc::new(self.task_config(task)?);
            let engine = factory(config.as_ref());
            let report = RunOrchestrator::new(config, engine.clone()).run().await;
            if let Err(e) = engine.shutdown().await {
                warn!(task_id = %task.id, error = %e, "Engine shutdown failed");
            }
            (report?.record, false)
        };

        let eval = self.verdict(&layout, &record).await;
        let summary = TaskSummary::new(&record, eval, resumed);
        self.add(summary.clone()).await?;
        Ok(summary)
    }

    /// A saved evaluation wins. Otherwise the judge decides when there is one,
    /// and without a judge a failed run is `failed` and anything else `unknown`.
    async fn verdict(&self, layout: &ResultsLayout, record: &RunRecord) -> EvalRecord {
        let saved = layout.eval_result();
        if saved.exists() {
            match read_json::<EvalRecord>(&saved).await {
                Ok(eval) => return eval,
                Err(e) => warn!(error = %e, "Ignoring unreadable evaluation"),
            }
        }

        if let Some(evaluator) = &self.evaluator {
            match evaluator.evaluate(layout.root()).await {
                Ok(eval) => return eval,
                Err(e) => warn!(task_id = %record.task_id, error = %e, "Evaluation failed"),
            }
        }

        if record.is_success() {
            EvalRecord::new(Verdict::Unknown, "")
        } else {
            EvalRecord::new(Verdict::Failed, "")
        }
    }

    async fn add(&self, summary: TaskSummary) -> Result<(), EvalError> {
        let mut results = self.results.lock().await;
        let task_id = summary.task_id.clone();
        let steps = summary.steps;
        let verdict = summary.verdict;
        results.add(summary);

        info!(
            task_id = %task_id,
            progress = %format!("{}/{}", results.total_tasks, self.planned.load(Ordering::SeqCst)),
            steps,
            verdict = %verdict,
            score = %results.success_rate(),
            "Task finished"
        );
        results.log_summary();

        let path = self.results_root.join(EXPERIMENT_RESULTS_FILE);
        write_json_atomic(&path, &*results)
            .await
            .map_err(|source| EvalError::Write { path, source })
    }

    /// Snapshot of the running totals.
    pub async fn results(&self) -> ExperimentResults {
        self.results.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;
    use webrun_core::{Outcome, RunId, TaskId};
    use webrun_engine::{
        EngineError, ExecutionResult, ToolInvoker, ToolResult, ToolSpec, WorkflowCallback,
        WorkflowHandle,
    };

    use crate::client::ChatRequest;

    /// Engine that answers every task with a fixed result.
    struct FixedEngine {
        execute: Result<Value, String>,
        prompts: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl ToolInvoker for FixedEngine {
        async fn invoke_tool(&self, _name: &str, _args: Value) -> Result<ToolResult, EngineError> {
            Ok(ToolResult {
                success: true,
                image: None,
                text: None,
                error: None,
            })
        }
    }

    #[async_trait]
    impl AgentEngine for FixedEngine {
        async fn register_tool(&self, _tool: ToolSpec) -> Result<(), EngineError> {
            Ok(())
        }

        async fn generate_workflow(&self, prompt: &str) -> Result<WorkflowHandle, EngineError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(WorkflowHandle::new(json!({ "name": prompt })))
        }

        async fn execute_workflow(
            &self,
            _workflow: &WorkflowHandle,
            _callback: Arc<dyn WorkflowCallback>,
        ) -> Result<ExecutionResult, EngineError> {
            self.execute
                .clone()
                .map(|payload| ExecutionResult { payload })
                .map_err(EngineError::Failed)
        }
    }

    struct ReplyJudge(&'static str);

    #[async_trait]
    impl Judge for ReplyJudge {
        async fn judge(&self, _request: &ChatRequest) -> Result<String, EvalError> {
            Ok(self.0.to_string())
        }
    }

    fn base_args() -> Args {
        Args {
            api_key: Some("sk-test".into()),
            base_url: Some("https://api.example.com".into()),
            headless: true,
            engine_command: "agent-engine".into(),
            ..Args::default()
        }
    }

    fn task(id: &str) -> TaskSpec {
        TaskSpec {
            id: id.into(),
            web: Some("https://example.com".into()),
            ques: format!("question {}", id),
        }
    }

    /// Engine factory answering failures for ids listed in `failing`.
    fn factory(
        prompts: Arc<StdMutex<Vec<String>>>,
        failing: &'static [&'static str],
    ) -> impl Fn(&TaskConfig) -> Arc<FixedEngine> {
        move |config: &TaskConfig| {
            let execute = if failing.contains(&config.task_id.as_str()) {
                Err("tool timeout".to_string())
            } else {
                Ok(json!("Example Domain"))
            };
            Arc::new(FixedEngine {
                execute,
                prompts: prompts.clone(),
            })
        }
    }

    fn write_record(dir: &Path, id: &str, outcome: Outcome) {
        let mut record = RunRecord::new(TaskId::new(id), RunId::new("r0"), "old prompt", Utc::now());
        record.finish(outcome, Utc::now()).unwrap();
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("task_result.json"), serde_json::to_vec(&record).unwrap()).unwrap();
    }

    #[test]
    fn test_prompt_appends_site() {
        assert_eq!(task("a").prompt(), "question a on https://example.com");
        let bare = TaskSpec {
            id: "b".into(),
            web: None,
            ques: "say hi".into(),
        };
        assert_eq!(bare.prompt(), "say hi");
    }

    #[tokio::test]
    async fn test_load_tasks_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.jsonl");
        std::fs::write(
            &path,
            "{\"id\":\"A--1\",\"web\":\"https://a.com\",\"ques\":\"q1\"}\n\n{\"id\":\"B--2\",\"ques\":\"q2\"}\n",
        )
        .unwrap();

        let tasks = load_tasks(&path).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].prompt(), "q1 on https://a.com");
        assert_eq!(tasks[1].web, None);
    }

    #[tokio::test]
    async fn test_load_tasks_reports_bad_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.jsonl");
        std::fs::write(&path, "{\"id\":\"A\",\"ques\":\"q\"}\n{\"id\":\"B\"}\n").unwrap();

        let err = load_tasks(&path).await.unwrap_err();
        assert!(matches!(err, EvalError::TaskList { line: 2, .. }));
    }

    #[tokio::test]
    async fn test_exclusions_filter_tasks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("impossible.json");
        std::fs::write(&path, r#"["b"]"#).unwrap();

        let excluded = load_exclusions(&path).await.unwrap();
        let kept = exclude(vec![task("a"), task("b"), task("c")], &excluded);
        let ids: Vec<&str> = kept.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
    }

    #[tokio::test]
    async fn test_batch_aggregates_counts() {
        let root = TempDir::new().unwrap();
        let prompts = Arc::new(StdMutex::new(Vec::new()));
        let runner = BatchRunner::new(base_args(), root.path(), 2);

        let results = runner
            .run_batch(vec![task("a"), task("b"), task("c")], factory(prompts.clone(), &["b"]))
            .await;

        assert_eq!(results.total_tasks, 3);
        assert_eq!(results.total_success, 0);
        assert_eq!(results.total_failed, 1);
        assert_eq!(results.total_unknown, 2);
        assert_eq!(prompts.lock().unwrap().len(), 3);
        for id in ["a", "b", "c"] {
            assert!(root.path().join(id).join("task_result.json").exists());
        }

        let saved: ExperimentResults = serde_json::from_slice(
            &std::fs::read(root.path().join(EXPERIMENT_RESULTS_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(saved, results);
        let b = saved.all_tasks.iter().find(|t| t.task_id == "b").unwrap();
        assert_eq!(b.verdict, Verdict::Failed);
        assert_eq!(b.final_answer, "tool timeout");
    }

    #[tokio::test]
    async fn test_existing_result_is_not_rerun() {
        let root = TempDir::new().unwrap();
        write_record(&root.path().join("a"), "a", Outcome::Success(json!("cached answer")));
        std::fs::write(
            root.path().join("a").join("eval_result.json"),
            serde_json::to_vec(&EvalRecord::from_response("Looks right. SUCCESS")).unwrap(),
        )
        .unwrap();

        let prompts = Arc::new(StdMutex::new(Vec::new()));
        let runner = BatchRunner::new(base_args(), root.path(), 3);
        let results = runner
            .run_batch(vec![task("a"), task("b")], factory(prompts.clone(), &[]))
            .await;

        assert_eq!(*prompts.lock().unwrap(), ["question b on https://example.com"]);
        assert_eq!(results.total_tasks, 2);
        assert_eq!(results.total_success, 1);
        assert_eq!(results.total_unknown, 1);

        let a = results.all_tasks.iter().find(|t| t.task_id == "a").unwrap();
        assert!(a.resumed);
        assert_eq!(a.final_answer, "cached answer");
        assert_eq!(a.task_prompt, "old prompt");
    }

    #[tokio::test]
    async fn test_judge_decides_new_runs() {
        let root = TempDir::new().unwrap();
        let prompts = Arc::new(StdMutex::new(Vec::new()));
        let judge: Arc<dyn Judge> = Arc::new(ReplyJudge("Matches the page. SUCCESS"));
        let runner = BatchRunner::new(base_args(), root.path(), 1)
            .with_evaluator(Evaluator::new(judge, "gpt-4o"));

        let summary = runner
            .run_task(&task("a"), &factory(prompts, &[]))
            .await
            .unwrap();

        assert_eq!(summary.verdict, Verdict::Success);
        assert_eq!(summary.judge_response, "Matches the page. SUCCESS");
        assert!(root.path().join("a").join("eval_result.json").exists());
        assert_eq!(runner.results().await.total_success, 1);
    }

    #[tokio::test]
    async fn test_unstartable_task_is_left_out() {
        let root = TempDir::new().unwrap();
        let prompts = Arc::new(StdMutex::new(Vec::new()));
        let args = Args {
            api_key: None,
            ..base_args()
        };
        let runner = BatchRunner::new(args, root.path(), 1);

        let err = runner
            .run_task(&task("a"), &factory(prompts.clone(), &[]))
            .await
            .unwrap_err();

        assert!(matches!(err, EvalError::Run(_)));
        assert!(prompts.lock().unwrap().is_empty());
        assert_eq!(runner.results().await.total_tasks, 0);
    }
}
