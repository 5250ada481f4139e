//! Success-rate scoring over evaluated run groups.
//!
//! Layout: `<root>/<group>/<task>/eval_result.json`.

use std::path::Path;

use serde::Serialize;
use tokio::fs;
use tracing::{debug, warn};
use webrun_core::layout::EVAL_RESULT_FILE;

use crate::error::EvalError;
use crate::verdict::{EvalRecord, Verdict};

/// Tally of one run group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupScore {
    pub group: String,
    /// Tasks with a readable `eval_result.json`.
    pub evaluated: usize,
    pub succeeded: usize,
    pub success_rate: f64,
}

impl GroupScore {
    pub fn new(group: impl Into<String>, evaluated: usize, succeeded: usize) -> Self {
        let success_rate = if evaluated == 0 {
            0.0
        } else {
            succeeded as f64 / evaluated as f64
        };
        Self {
            group: group.into(),
            evaluated,
            succeeded,
            success_rate,
        }
    }

    /// e.g. `Success rate : 0.67=2/3`
    pub fn summary_line(&self) -> String {
        format!(
            "Success rate : {:.2}={}/{}",
            self.success_rate, self.succeeded, self.evaluated
        )
    }
}

async fn subdirectories(dir: &Path) -> Result<Vec<String>, std::io::Error> {
    let mut entries = fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

async fn read_verdict(path: &Path) -> Option<Verdict> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping unreadable eval result");
            return None;
        }
    };
    match serde_json::from_slice::<EvalRecord>(&bytes) {
        Ok(record) => Some(record.eval_result),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping malformed eval result");
            None
        }
    }
}

/// Score one group directory.
pub async fn score_group(group_dir: &Path) -> Result<GroupScore, EvalError> {
    let group = group_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let tasks = subdirectories(group_dir)
        .await
        .map_err(|source| EvalError::Read {
            path: group_dir.to_path_buf(),
            source,
        })?;

    let mut evaluated = 0;
    let mut succeeded = 0;
    for task in &tasks {
        if let Some(verdict) = read_verdict(&group_dir.join(task).join(EVAL_RESULT_FILE)).await {
            evaluated += 1;
            if verdict == Verdict::Success {
                succeeded += 1;
            }
        }
    }

    debug!(group = %group, tasks = tasks.len(), evaluated, succeeded, "Scored group");
    Ok(GroupScore::new(group, evaluated, succeeded))
}

/// Score every group under `root`, sorted by group name.
pub async fn score_root(root: &Path) -> Result<Vec<GroupScore>, EvalError> {
    let groups = subdirectories(root)
        .await
        .map_err(|source| EvalError::Read {
            path: root.to_path_buf(),
            source,
        })?;

    let mut scores = Vec::with_capacity(groups.len());
    for group in groups {
        scores.push(score_group(&root.join(group)).await?);
    }
    Ok(scores)
}
