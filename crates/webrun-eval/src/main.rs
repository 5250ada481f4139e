//! WebRun evaluation CLI - run task batches, judge results and report success rates.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use webrun_eval::batch::{exclude, load_exclusions, load_tasks, DEFAULT_MAX_CONCURRENT};
use webrun_eval::client::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use webrun_eval::evaluator::DEFAULT_MAX_SCREENSHOTS;
use webrun_eval::{score_root, BatchRunner, EvalError, Evaluator, Judge, JudgeClient};
use webrun_runner::{Args, TaskConfig};

/// WebRun evaluation tool
#[derive(Parser)]
#[command(name = "webrun-eval")]
#[command(about = "Run WebRun task batches, judge results and compute success rates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Judge one task results directory and write eval_result.json
    Evaluate {
        /// Directory holding task_result.json and screenshots/
        task_dir: PathBuf,

        /// Judge API key
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// OpenAI-compatible API base URL
        #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
        base_url: String,

        /// Judge model
        #[arg(long, env = "EVAL_MODEL", default_value = DEFAULT_MODEL)]
        model: String,

        /// Number of trailing screenshots sent to the judge
        #[arg(long, default_value_t = DEFAULT_MAX_SCREENSHOTS)]
        max_screenshots: usize,
    },

    /// Run every task of a JSONL task list, resuming finished ones
    Batch {
        /// JSONL file with one `{"id", "web", "ques"}` object per line
        #[arg(long)]
        tasks: PathBuf,

        /// JSON array of task ids to skip
        #[arg(long)]
        exclude: Option<PathBuf>,

        /// Maximum number of tasks running at once
        #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT)]
        max_concurrent: usize,

        /// Judge API key; without one, verdicts come from the run outcome
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        judge_api_key: Option<String>,

        /// OpenAI-compatible API base URL of the judge
        #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
        judge_base_url: String,

        /// Judge model
        #[arg(long, env = "EVAL_MODEL", default_value = DEFAULT_MODEL)]
        judge_model: String,

        /// Run settings shared by every task; `--results-dir` is the batch root
        #[command(flatten)]
        run: Args,
    },

    /// Print the success rate of every run group under a results root
    Score {
        /// Directory of run groups
        #[arg(default_value = "results")]
        results_root: PathBuf,

        /// Emit one JSON object per group instead of text
        #[arg(long)]
        json: bool,
    },
}

async fn run(cli: Cli) -> Result<(), EvalError> {
    match cli.command {
        Commands::Evaluate {
            task_dir,
            api_key,
            base_url,
            model,
            max_screenshots,
        } => {
            let api_key = api_key
                .filter(|k| !k.trim().is_empty())
                .ok_or(EvalError::Configuration("OPENAI_API_KEY"))?;
            let client = JudgeClient::new(&base_url, api_key, &model);
            let evaluator = Evaluator::new(client, model).with_max_screenshots(max_screenshots);

            let eval = evaluator.evaluate(&task_dir).await?;
            println!("{}", eval.eval_result);
        }
        Commands::Batch {
            tasks,
            exclude: exclude_path,
            max_concurrent,
            judge_api_key,
            judge_base_url,
            judge_model,
            run,
        } => {
            let mut specs = load_tasks(&tasks).await?;
            if let Some(path) = exclude_path {
                let excluded = load_exclusions(&path).await?;
                let before = specs.len();
                specs = exclude(specs, &excluded);
                info!(excluded = before - specs.len(), "Removed excluded tasks");
            }

            let root = run.results_dir.clone();
            tokio::fs::create_dir_all(&root)
                .await
                .map_err(|source| EvalError::Write {
                    path: root.clone(),
                    source,
                })?;

            let mut runner = BatchRunner::new(run, &root, max_concurrent);
            match judge_api_key.filter(|k| !k.trim().is_empty()) {
                Some(key) => {
                    let judge: Arc<dyn Judge> =
                        Arc::new(JudgeClient::new(&judge_base_url, key, &judge_model));
                    runner = runner.with_evaluator(Evaluator::new(judge, judge_model));
                }
                None => info!("No judge API key, verdicts follow run outcomes"),
            }

            let results = runner
                .run_batch(specs, |config: &TaskConfig| Arc::new(config.process_engine()))
                .await;
            println!(
                "Success rate: {} (failed {}, unknown {})",
                results.success_rate(),
                results.total_failed,
                results.total_unknown
            );
        }
        Commands::Score { results_root, json } => {
            info!(root = %results_root.display(), "Scoring results");
            for score in score_root(&results_root).await? {
                if json {
                    match serde_json::to_string(&score) {
                        Ok(line) => println!("{}", line),
                        Err(e) => error!(group = %score.group, error = %e, "Failed to serialize score"),
                    }
                } else {
                    println!("{}", score.group);
                    println!("{}", score.summary_line());
                    println!();
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Evaluation failed");
            ExitCode::FAILURE
        }
    }
}
