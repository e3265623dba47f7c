mod assemble;
mod chunker;
mod cli;
mod commands;
mod context_search;
mod error;
mod extract;
mod model;
mod ocr;
mod retrieve;
mod semantic;
mod store;
mod throttle;
mod util;
mod validate;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::error::PipelineError;

/// Exit status when an exam cannot be filled from the available pool.
const EXIT_INSUFFICIENT_QUESTIONS: i32 = 2;

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        let status = match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::InsufficientQuestions { .. }) => EXIT_INSUFFICIENT_QUESTIONS,
            _ => 1,
        };
        std::process::exit(status);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest(args) => commands::ingest::run(args),
        Commands::IngestLegal(args) => commands::ingest_legal::run(args),
        Commands::Search(args) => commands::search::run(args),
        Commands::Assemble(args) => commands::assemble::run(args),
        Commands::Status(args) => commands::status::run(args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
