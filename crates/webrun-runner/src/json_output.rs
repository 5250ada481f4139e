//! Machine-readable run summary written to stdout.
//!
//! Exactly one JSON line is emitted per process. Logs go to stderr so stdout
//! stays parseable.

use std::io::{self, Write};

use serde::Serialize;
use webrun_core::RunRecord;

use crate::orchestrator::RunReport;

/// Error side of a summary: the full record when one exists, otherwise just
/// a message.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SummaryError<'a> {
    Record(&'a RunRecord),
    Message { message: String },
}

/// The summary line.
#[derive(Debug, Clone, Serialize)]
pub struct Summary<'a> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<&'a RunRecord>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SummaryError<'a>>,

    /// Whether `task_result.json` was written.
    pub persisted: bool,

    pub exit_code: i32,
}

impl<'a> Summary<'a> {
    /// Summary of a run that produced a record.
    pub fn from_report(report: &'a RunReport) -> Self {
        let success = report.record.is_success();
        Self {
            success,
            result: success.then_some(&report.record),
            error: (!success).then_some(SummaryError::Record(&report.record)),
            persisted: report.persisted,
            exit_code: report.exit_code(),
        }
    }

    /// Summary of a run that stopped before a record existed.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(SummaryError::Message {
                message: message.into(),
            }),
            persisted: false,
            exit_code: 1,
        }
    }

    /// Summary for a rejected command line. `None` for `--help` and
    /// `--version`, which are not failures.
    pub fn from_parse_error(err: &clap::Error) -> Option<Self> {
        err.use_stderr().then(|| Self::fatal(err.to_string()))
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"success":false,"error":{{"message":"summary serialization failed: {}"}},"persisted":{},"exit_code":{}}}"#,
                e, self.persisted, self.exit_code
            )
        })
    }

    /// Write this summary as one line to stdout.
    pub fn emit(&self) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{}", self.to_line());
        let _ = stdout.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Value};
    use webrun_core::{RunId, TaskId};

    fn report(success: bool) -> RunReport {
        let mut record = RunRecord::new(TaskId::new("T1"), RunId::new("r1"), "prompt", Utc::now());
        let outcome = if success {
            webrun_core::Outcome::Success(json!("done"))
        } else {
            webrun_core::Outcome::Failure("tool timeout".into())
        };
        record.finish(outcome, Utc::now()).unwrap();
        RunReport {
            record,
            persisted: true,
        }
    }

    #[test]
    fn test_success_summary() {
        let report = report(true);
        let line: Value = serde_json::from_str(&Summary::from_report(&report).to_line()).unwrap();
        assert_eq!(line["success"], true);
        assert_eq!(line["result"]["result"], "done");
        assert!(line.get("error").is_none());
        assert_eq!(line["exit_code"], 0);
    }

    #[test]
    fn test_failure_summary_carries_record() {
        let report = report(false);
        let line: Value = serde_json::from_str(&Summary::from_report(&report).to_line()).unwrap();
        assert_eq!(line["success"], false);
        assert_eq!(line["error"]["error"], "tool timeout");
        assert_eq!(line["error"]["task_id"], "T1");
        assert!(line.get("result").is_none());
        assert_eq!(line["exit_code"], 1);
    }

    #[test]
    fn test_fatal_summary() {
        let line: Value = serde_json::from_str(
            &Summary::fatal("Missing required environment variables: TASK_ID").to_line(),
        )
        .unwrap();
        assert_eq!(line["success"], false);
        assert_eq!(
            line["error"]["message"],
            "Missing required environment variables: TASK_ID"
        );
        assert_eq!(line["persisted"], false);
    }

    #[test]
    fn test_rejected_command_line_summary() {
        use clap::Parser;

        let err = crate::config::Args::try_parse_from(["webrun", "--bogus"]).unwrap_err();
        let summary = Summary::from_parse_error(&err).unwrap();
        let line = summary.to_line();
        assert!(!line.contains('\n'));

        let line: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(line["success"], false);
        assert_eq!(line["exit_code"], 1);
        assert!(line["error"]["message"].as_str().unwrap().contains("--bogus"));
    }

    #[test]
    fn test_help_is_not_a_failure() {
        use clap::Parser;

        let err = crate::config::Args::try_parse_from(["webrun", "--help"]).unwrap_err();
        assert!(Summary::from_parse_error(&err).is_none());
    }

    #[test]
    fn test_summary_is_single_line() {
        let report = report(true);
        assert!(!Summary::from_report(&report).to_line().contains('\n'));
    }
}
