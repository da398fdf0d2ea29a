//! Check subcommands.

pub mod alerts;
pub mod dashboards;
pub mod logs;
pub mod metrics;
pub mod smoke;
pub mod workloads;

use anyhow::Result;

use crate::cli::Commands;
use crate::context::Stack;
use crate::report::Report;

pub async fn handle(command: Commands, stack: &Stack<'_>, report: &mut Report) -> Result<()> {
    match command {
        Commands::Smoke => smoke::run(stack, report).await,
        Commands::Metrics => metrics::run(stack, report).await,
        Commands::Dashboards(args) => dashboards::run(args, stack, report).await,
        Commands::Logs => logs::run(stack, report).await,
        Commands::Alerts => alerts::run(stack, report).await,
        Commands::Workloads => workloads::run(stack, report).await,
    }
}
