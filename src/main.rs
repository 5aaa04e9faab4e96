use clap::Parser;
use std::process::ExitCode;

mod config;
mod db;
mod error;
mod llm;
mod pipeline;
mod prompt;
mod util;

use crate::config::{AppConfig, CliArgs};
use crate::error::PipelineError;
use crate::pipeline::{Pipeline, PipelineOutcome, RunOptions};
use crate::util::logging::init_tracing;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_tracing(args.verbose, args.log_json);

    match run(&args).await {
        Ok(outcome) => match render(&outcome, args.json) {
            Ok(text) => {
                print!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("OutputError: failed to serialize outcome: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("{}: {}", e.kind(), e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: &CliArgs) -> Result<PipelineOutcome, PipelineError> {
    // Load configuration
    let config = AppConfig::new(args)?;

    let pipeline = Pipeline::from_config(&config, |name| std::env::var(name).ok())?;

    let options = RunOptions {
        execute: args.execute,
        summarize: args.summarize,
        reject_ambiguous: args.reject_ambiguous,
    };

    pipeline.run(&args.question, &options).await
}

fn render(outcome: &PipelineOutcome, json: bool) -> serde_json::Result<String> {
    if json {
        serde_json::to_string_pretty(outcome).map(|s| s + "\n")
    } else {
        Ok(outcome.to_text())
    }
}
