//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::dashboards::DashboardsArgs;

/// Verify a deployed observability stack through its public APIs.
#[derive(Parser, Debug)]
#[command(name = "stackcheck")]
#[command(author, version = env!("STACKCHECK_VERSION"), about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv); overrides LOG_LEVEL
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Write logs to this file instead of LOG_FILE
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that every service answers and reports a healthy state
    Smoke,

    /// Check that node, process and calico metrics exist for every node
    Metrics,

    /// Run the panel queries of Grafana dashboards
    Dashboards(DashboardsArgs),

    /// Check Elasticsearch health and that every pod and node ships logs
    Logs,

    /// Check alert states in Alertmanager and Alerta
    Alerts,

    /// Check that daemonsets, deployments and statefulsets are ready
    Workloads,
}
