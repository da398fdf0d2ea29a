//! stackcheck - verification checks for a deployed observability stack.
//!
//! Settings come from the environment (see [`stackcheck_core::Settings`]);
//! the stack's services are discovered through the cluster API.

mod catalog;
mod cli;
mod commands;
mod context;
mod logging;
mod output;
mod report;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use stackcheck_core::Settings;

use cli::Cli;
use context::Stack;
use report::Report;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let settings = Settings::from_env().context("Failed to read settings from the environment")?;
    let log_file = cli.log_file.as_deref().unwrap_or(&settings.log_file);
    let _guard = logging::init_logging(&settings.log_level, cli.verbose, cli.json_logs, log_file)?;

    info!(
        version = env!("STACKCHECK_VERSION"),
        command = ?cli.command,
        "Starting checks"
    );

    let stack = Stack::connect(&settings).await?;
    let mut report = Report::new();
    commands::handle(cli.command, &stack, &mut report).await?;
    report.print_summary();

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
