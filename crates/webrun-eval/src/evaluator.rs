//! Evaluate one results directory.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use tokio::fs;
use tracing::{info, warn};
use webrun_core::layout::ResultsLayout;
use webrun_core::RunRecord;
use webrun_runner::persist::write_json_atomic;
use webrun_runner::ScreenshotCollector;

use crate::client::{ChatMessage, ChatRequest, ContentPart, Judge, MAX_TOKENS};
use crate::error::EvalError;
use crate::prompt::{task_text, SYSTEM_PROMPT, VERDICT_CUE};
use crate::verdict::{EvalRecord, Verdict};

/// Screenshots sent to the judge by default (the most recent ones).
pub const DEFAULT_MAX_SCREENSHOTS: usize = 4;

/// The textual answer a run produced, as shown to the judge.
pub fn answer_text(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build the judge request for a task prompt, its answer and image URLs.
pub fn build_request(model: &str, task: &str, answer: &str, images: &[String]) -> ChatRequest {
    let mut parts = Vec::with_capacity(images.len() + 2);
    parts.push(ContentPart::text(task_text(task, answer, images.len())));
    parts.extend(images.iter().map(ContentPart::image));
    parts.push(ContentPart::text(VERDICT_CUE));

    ChatRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(parts)],
        max_tokens: MAX_TOKENS,
    }
}

fn mime_for(file_name: &str) -> &'static str {
    if file_name.to_ascii_lowercase().ends_with(".png") {
        "image/png"
    } else {
        "image/jpeg"
    }
}

/// Judges runs and writes `eval_result.json`.
pub struct Evaluator<J> {
    judge: J,
    model: String,
    max_screenshots: usize,
}

impl<J: Judge> Evaluator<J> {
    pub fn new(judge: J, model: impl Into<String>) -> Self {
        Self {
            judge,
            model: model.into(),
            max_screenshots: DEFAULT_MAX_SCREENSHOTS,
        }
    }

    /// Builder method to change how many trailing screenshots are sent.
    pub fn with_max_screenshots(mut self, max: usize) -> Self {
        self.max_screenshots = max;
        self
    }

    /// The last `max_screenshots` images of a run, in capture order, as data
    /// URLs. Unreadable files are skipped.
    pub async fn screenshot_urls(&self, layout: &ResultsLayout) -> Vec<String> {
        let mut refs = ScreenshotCollector::new(layout.screenshots_dir()).scan().await;
        refs.sort_by(|a, b| a.captured_at.cmp(&b.captured_at).then_with(|| a.id.cmp(&b.id)));
        let skip = refs.len().saturating_sub(self.max_screenshots);

        let mut urls = Vec::new();
        for shot in refs.into_iter().skip(skip) {
            let path = layout.screenshots_dir().join(&shot.id);
            match fs::read(&path).await {
                Ok(bytes) => urls.push(format!(
                    "data:{};base64,{}",
                    mime_for(&shot.id),
                    STANDARD.encode(bytes)
                )),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable screenshot"),
            }
        }
        urls
    }

    /// Evaluate the run stored in `task_dir` and persist the verdict.
    pub async fn evaluate(&self, task_dir: &Path) -> Result<EvalRecord, EvalError> {
        if !task_dir.is_dir() {
            return Err(EvalError::TaskDirMissing(task_dir.to_path_buf()));
        }
        let layout = ResultsLayout::new(task_dir);

        let path = layout.task_result();
        let text = fs::read_to_string(&path)
            .await
            .map_err(|source| EvalError::Read {
                path: path.clone(),
                source,
            })?;
        let record: RunRecord =
            serde_json::from_str(&text).map_err(|source| EvalError::Parse { path, source })?;

        let eval = match record.result() {
            Some(result) => {
                let images = self.screenshot_urls(&layout).await;
                info!(task_id = %record.task_id, screenshots = images.len(), "Requesting judge verdict");
                let request = build_request(&self.model, &record.task_prompt, &answer_text(result), &images);
                EvalRecord::from_response(self.judge.judge(&request).await?)
            }
            None => {
                info!(task_id = %record.task_id, "Run has no result, marking failed");
                EvalRecord::new(Verdict::Failed, "")
            }
        };

        let out = layout.eval_result();
        write_json_atomic(&out, &eval)
            .await
            .map_err(|source| EvalError::Write { path: out, source })?;

        info!(task_id = %record.task_id, verdict = %eval.eval_result, "Evaluation saved");
        Ok(eval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use webrun_core::{Outcome, RunId, TaskId};

    struct StubJudge {
        reply: String,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl StubJudge {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Judge for StubJudge {
        async fn judge(&self, request: &ChatRequest) -> Result<String, EvalError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(self.reply.clone())
        }
    }

    fn write_run(dir: &Path, outcome: Outcome) {
        let mut record = RunRecord::new(TaskId::new("T1"), RunId::new("r1"), "find the title", Utc::now());
        record.finish(outcome, Utc::now()).unwrap();
        std::fs::create_dir_all(dir.join("screenshots")).unwrap();
        std::fs::write(dir.join("task_result.json"), serde_json::to_vec(&record).unwrap()).unwrap();
    }

    #[test]
    fn test_build_request_layout() {
        let images = vec!["data:image/png;base64,AAAA".to_string()];
        let request = build_request("gpt-4o", "find the title", "Example Domain", &images);
        let json = serde_json::to_value(&request).unwrap();

        let parts = json["messages"][1]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts[0]["text"].as_str().unwrap().contains("1 screenshot at the end"));
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(parts[2]["text"], "Your verdict:\n");
        assert_eq!(json["max_tokens"], 1000);
    }

    #[test]
    fn test_answer_text() {
        assert_eq!(answer_text(&json!("Example Domain")), "Example Domain");
        assert_eq!(answer_text(&json!({"title": "x"})), r#"{"title":"x"}"#);
    }

    #[tokio::test]
    async fn test_failed_run_skips_judge() {
        let dir = TempDir::new().unwrap();
        write_run(dir.path(), Outcome::Failure("tool timeout".into()));
        let evaluator = Evaluator::new(StubJudge::new("SUCCESS"), "gpt-4o");

        let eval = evaluator.evaluate(dir.path()).await.unwrap();

        assert_eq!(eval.eval_result, Verdict::Failed);
        assert!(eval.judge_response.is_empty());
        assert!(evaluator.judge.requests.lock().unwrap().is_empty());
        assert!(dir.path().join("eval_result.json").exists());
    }

    #[tokio::test]
    async fn test_successful_run_is_judged() {
        let dir = TempDir::new().unwrap();
        write_run(dir.path(), Outcome::Success(json!("Example Domain")));
        for i in 1..=6 {
            std::fs::write(dir.path().join(format!("screenshots/step_{:04}.jpeg", i)), [0xff, 0xd8]).unwrap();
        }
        let evaluator = Evaluator::new(StubJudge::new("All good. SUCCESS"), "gpt-4o");

        let eval = evaluator.evaluate(dir.path()).await.unwrap();
        assert_eq!(eval.eval_result, Verdict::Success);

        let requests = evaluator.judge.requests.lock().unwrap();
        let json = serde_json::to_value(&requests[0]).unwrap();
        let parts = json["messages"][1]["content"].as_array().unwrap();
        assert_eq!(parts.len(), DEFAULT_MAX_SCREENSHOTS + 2);
        assert!(parts[0]["text"].as_str().unwrap().contains("Example Domain"));
        assert!(parts[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));

        let saved: EvalRecord =
            serde_json::from_slice(&std::fs::read(dir.path().join("eval_result.json")).unwrap()).unwrap();
        assert_eq!(saved.eval_result, Verdict::Success);
    }

    #[tokio::test]
    async fn test_missing_task_dir() {
        let dir = TempDir::new().unwrap();
        let evaluator = Evaluator::new(StubJudge::new("SUCCESS"), "gpt-4o");
        let err = evaluator.evaluate(&dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, EvalError::TaskDirMissing(_)));
    }

    #[tokio::test]
    async fn test_malformed_record() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("task_result.json"), b"{not json").unwrap();
        let evaluator = Evaluator::new(StubJudge::new("SUCCESS"), "gpt-4o");
        let err = evaluator.evaluate(dir.path()).await.unwrap_err();
        assert!(matches!(err, EvalError::Parse { .. }));
    }
}
