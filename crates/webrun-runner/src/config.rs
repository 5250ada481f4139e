//! Runner configuration.
//!
//! Values come from the command line or the environment (a `.env` file is
//! loaded first by the binary). Validation happens once, in
//! [`TaskConfig::from_args`], before anything touches the filesystem.

use std::fmt;
use std::path::PathBuf;

use clap::{ArgAction, Parser};
use webrun_core::layout::ResultsLayout;
use webrun_core::TaskId;
use webrun_engine::ProcessEngine;

use crate::error::RunnerError;

fn debug_flag(value: &str) -> Result<bool, String> {
    Ok(value == "true")
}

fn headless_flag(value: &str) -> Result<bool, String> {
    Ok(value != "false")
}

/// Raw command-line / environment inputs.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "webrun")]
#[command(about = "Run one browser-automation task through the agent engine", long_about = None)]
pub struct Args {
    /// Task identifier
    #[arg(long, env = "TASK_ID")]
    pub task_id: Option<String>,

    /// Natural-language task description
    #[arg(long, env = "TASK_PROMPT")]
    pub task_prompt: Option<String>,

    /// Directory receiving every artifact of the run
    #[arg(long, env = "RESULTS_DIR", default_value = "./results")]
    pub results_dir: PathBuf,

    /// Model API key handed to the engine
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model API base URL handed to the engine
    #[arg(long, env = "ANTHROPIC_BASE_URL")]
    pub base_url: Option<String>,

    /// Verbose logging and config dump (only `true` enables)
    #[arg(long, env = "DEBUG", default_value_t = false, action = ArgAction::Set, value_parser = debug_flag)]
    pub debug: bool,

    /// Run the browser without a window (only `false` disables)
    #[arg(long, env = "HEADLESS", default_value_t = true, action = ArgAction::Set, value_parser = headless_flag)]
    pub headless: bool,

    /// Engine executable
    #[arg(long, env = "ENGINE_COMMAND", default_value = "agent-engine")]
    pub engine_command: String,

    /// Extra engine arguments (space separated in the environment)
    #[arg(long = "engine-arg", env = "ENGINE_ARGS", value_delimiter = ' ')]
    pub engine_args: Vec<String>,
}

/// Validated configuration of one run.
#[derive(Clone)]
pub struct TaskConfig {
    pub task_id: TaskId,
    pub task_prompt: String,
    pub api_key: String,
    pub base_url: String,
    pub debug: bool,
    pub headless: bool,
    pub engine_command: String,
    pub engine_args: Vec<String>,
    layout: ResultsLayout,
}

fn required(value: Option<String>, name: &'static str, missing: &mut Vec<&'static str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => {
            missing.push(name);
            String::new()
        }
    }
}

impl TaskConfig {
    /// Validate raw inputs. Every missing or blank value is reported in a
    /// single error.
    pub fn from_args(args: Args) -> Result<Self, RunnerError> {
        let mut missing = Vec::new();

        let api_key = required(args.api_key, "ANTHROPIC_API_KEY", &mut missing);
        let base_url = required(args.base_url, "ANTHROPIC_BASE_URL", &mut missing);
        let task_id = required(args.task_id, "TASK_ID", &mut missing);
        let task_prompt = required(args.task_prompt, "TASK_PROMPT", &mut missing);
        if args.results_dir.as_os_str().is_empty() {
            missing.push("RESULTS_DIR");
        }

        if !missing.is_empty() {
            return Err(RunnerError::Configuration { missing });
        }

        let engine_args = args
            .engine_args
            .into_iter()
            .filter(|a| !a.is_empty())
            .collect();

        Ok(Self {
            task_id: TaskId::new(task_id),
            task_prompt,
            api_key,
            base_url,
            debug: args.debug,
            headless: args.headless,
            engine_command: args.engine_command,
            engine_args,
            layout: ResultsLayout::new(args.results_dir),
        })
    }

    /// Artifact paths of this run.
    pub fn layout(&self) -> &ResultsLayout {
        &self.layout
    }

    /// Build the engine subprocess described by this config.
    ///
    /// The engine receives the model credentials, the screenshot directory it
    /// may write into, and the log level. Its stderr goes to `logs/engine.log`.
    pub fn process_engine(&self) -> ProcessEngine {
        let log_level = if self.debug { "debug" } else { "info" };
        ProcessEngine::new(&self.engine_command)
            .with_args(self.engine_args.iter().cloned())
            .with_env("ANTHROPIC_API_KEY", &self.api_key)
            .with_env("ANTHROPIC_BASE_URL", &self.base_url)
            .with_env(
                "ENGINE_SCREENSHOT_DIR",
                self.layout.screenshots_dir().to_string_lossy(),
            )
            .with_env("ENGINE_LOG_LEVEL", log_level)
            .with_log_file(self.layout.engine_log())
    }
}

impl fmt::Debug for TaskConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskConfig")
            .field("task_id", &self.task_id)
            .field("task_prompt", &self.task_prompt)
            .field("results_dir", &self.layout.root())
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .field("debug", &self.debug)
            .field("headless", &self.headless)
            .field("engine_command", &self.engine_command)
            .field("engine_args", &self.engine_args)
            .finish()
    }
}
