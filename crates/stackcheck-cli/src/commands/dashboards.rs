//! Grafana dashboard panel queries.

use std::collections::BTreeSet;

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::{debug, info};

use stackcheck_clients::grafana::{Dashboard, IgnoreLists, run_dashboard};
use stackcheck_clients::{GrafanaClient, PrometheusClient};

use crate::catalog::{self, UNLISTED_DASHBOARDS};
use crate::context::Stack;
use crate::report::{Report, ensure_none_missing};

#[derive(Args, Debug)]
pub struct DashboardsArgs {
    /// Check only this dashboard slug (repeatable); defaults to the built-in
    /// catalog
    #[arg(long = "name", value_name = "SLUG")]
    pub names: Vec<String>,
}

pub async fn run(args: DashboardsArgs, stack: &Stack<'_>, report: &mut Report) -> Result<()> {
    let grafana = stack.grafana().await?;
    let prometheus = stack.prometheus().await?;
    grafana
        .check_online()
        .await
        .context("Grafana is not online")?;

    let ignore = catalog::ignore_lists();
    let from_catalog = args.names.is_empty();
    let slugs = if from_catalog {
        catalog::dashboard_slugs()
    } else {
        args.names
    };

    for slug in &slugs {
        let name = format!("Dashboard {}", slug);
        match grafana.dashboard(slug).await {
            Ok(dashboard) => {
                report.record(name, check_dashboard(&dashboard, &prometheus, &ignore).await)
            }
            Err(e) if e.is_not_found() && from_catalog => report.skip(name, "not deployed"),
            Err(e) if e.is_not_found() => report.fail(name, "dashboard is not present"),
            Err(e) => report.fail(name, e.to_string()),
        }
    }

    if from_catalog {
        report.record("Dashboard catalog is complete", catalog_complete(&grafana).await);
    }
    Ok(())
}

async fn check_dashboard(
    dashboard: &Dashboard,
    prometheus: &PrometheusClient,
    ignore: &IgnoreLists,
) -> Result<()> {
    info!(dashboard = %dashboard.title(), "Running panel queries");

    let outcome = run_dashboard(dashboard, prometheus).await?;
    let summary = outcome.summary(ignore);
    debug!(dashboard = %dashboard.title(), "{}", summary);

    if !outcome.is_ok(ignore) {
        bail!("{}", summary);
    }
    Ok(())
}

/// Every dashboard Grafana lists is known to the catalog.
async fn catalog_complete(grafana: &GrafanaClient) -> Result<()> {
    let known: BTreeSet<String> = catalog::dashboard_slugs().into_iter().collect();
    let missing: Vec<String> = grafana
        .dashboard_names()
        .await?
        .into_iter()
        .filter(|name| !known.contains(name) && !UNLISTED_DASHBOARDS.contains(&name.as_str()))
        .collect();
    ensure_none_missing("Dashboards missing from the catalog", &missing)
}
