//! Per-node metric presence.

use anyhow::{Context, Result};
use tracing::info;

use stackcheck_clients::PrometheusClient;

use crate::catalog::TARGET_METRICS;
use crate::context::Stack;
use crate::report::{Report, ensure_none_missing};

pub async fn run(stack: &Stack<'_>, report: &mut Report) -> Result<()> {
    let prometheus = stack.prometheus().await?;
    let nodes = stack.k8s().nodes().await.context("Failed to list nodes")?;

    for (group, metrics) in TARGET_METRICS {
        for node in nodes.keys() {
            report.record(
                format!("{} metrics on {}", group, node),
                node_metrics(&prometheus, node, metrics).await,
            );
        }
    }
    Ok(())
}

async fn node_metrics(prometheus: &PrometheusClient, node: &str, metrics: &[&str]) -> Result<()> {
    let mut missing = Vec::new();
    for metric in metrics {
        let query = format!("{}{{node=\"{}\"}}", metric, node);
        info!(query = %query, "Checking metric");
        if prometheus.query(&query).await?.is_empty() {
            missing.push(query);
        }
    }
    ensure_none_missing("Metrics not found", &missing)
}
