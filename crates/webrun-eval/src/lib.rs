//! WebRun Evaluation
//!
//! Judges finished runs with a vision-capable chat model and aggregates the
//! verdicts into per-group success rates.
//!
//! - [`Evaluator`] reads one results directory, asks a [`Judge`] for a
//!   verdict and writes `eval_result.json` next to the run record.
//! - [`BatchRunner`] runs a task list through the runner a few tasks at a
//!   time, resuming finished tasks and keeping `experiment_results.json`.
//! - [`score_root`] walks a tree of run groups and counts successes.

pub mod batch;
pub mod client;
pub mod error;
pub mod evaluator;
pub mod prompt;
pub mod score;
pub mod verdict;

pub use batch::{BatchRunner, ExperimentResults, TaskSpec, TaskSummary};
pub use client::{ChatRequest, Judge, JudgeClient};
pub use error::EvalError;
pub use evaluator::Evaluator;
pub use score::{score_group, score_root, GroupScore};
pub use verdict::{EvalRecord, Verdict};
