//! Judge verdicts and the persisted evaluation record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of judging one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Success,
    Failed,
    Unknown,
}

impl Verdict {
    /// Read the verdict out of free-form judge text.
    ///
    /// `NOT SUCCESS` wins over `SUCCESS`, which it contains.
    pub fn parse(response: &str) -> Self {
        if response.contains("NOT SUCCESS") {
            Self::Failed
        } else if response.contains("SUCCESS") {
            Self::Success
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of `eval_result.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    pub eval_result: Verdict,

    /// Raw judge text. Empty when no judge was consulted.
    #[serde(default)]
    pub judge_response: String,

    pub evaluated_at: DateTime<Utc>,
}

impl EvalRecord {
    pub fn new(eval_result: Verdict, judge_response: impl Into<String>) -> Self {
        Self {
            eval_result,
            judge_response: judge_response.into(),
            evaluated_at: Utc::now(),
        }
    }

    /// Parse a verdict from judge text.
    pub fn from_response(judge_response: impl Into<String>) -> Self {
        let judge_response = judge_response.into();
        Self::new(Verdict::parse(&judge_response), judge_response)
    }
}
