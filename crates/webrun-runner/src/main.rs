//! WebRun task runner
//!
//! Runs one browser-automation task end to end and prints a one-line JSON
//! summary to stdout. Exit status is 0 only when the run succeeded.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use webrun_engine::AgentEngine;
use webrun_runner::json_output::Summary;
use webrun_runner::{Args, RunOrchestrator, TaskConfig};

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map(ExitCode::from).unwrap_or(ExitCode::FAILURE)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env before clap reads the environment
    let dotenv = dotenvy::dotenv();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => match Summary::from_parse_error(&e) {
            Some(summary) => {
                let _ = e.print();
                summary.emit();
                return ExitCode::FAILURE;
            }
            None => e.exit(),
        },
    };
    init_tracing(args.debug);

    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!(error = %e, "Failed to load .env file");
        }
    }

    let config = match TaskConfig::from_args(args) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            Summary::fatal(e.to_string()).emit();
            return ExitCode::FAILURE;
        }
    };

    if config.debug {
        debug!(config = ?config, "Configuration");
    }

    info!(
        task_id = %config.task_id,
        results_dir = %config.layout().root().display(),
        engine = %config.engine_command,
        "Starting WebRun task"
    );

    let engine = Arc::new(config.process_engine());
    let orchestrator = RunOrchestrator::new(config.clone(), engine.clone());

    let code = match orchestrator.run().await {
        Ok(report) => {
            Summary::from_report(&report).emit();
            report.exit_code()
        }
        Err(e) => {
            error!(error = %e, "Run could not start");
            Summary::fatal(e.to_string()).emit();
            1
        }
    };

    if let Err(e) = engine.shutdown().await {
        warn!(error = %e, "Engine shutdown failed");
    }

    exit_code(code)
}
