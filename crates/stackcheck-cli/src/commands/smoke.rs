//! Smoke checks: every service answers and reports itself healthy.

use anyhow::{Result, ensure};
use tracing::debug;

use stackcheck_clients::PrometheusClient;

use crate::context::Stack;
use crate::report::Report;

pub async fn run(stack: &Stack<'_>, report: &mut Report) -> Result<()> {
    match stack.prometheus().await {
        Ok(prometheus) => {
            report.record("Prometheus has measurements", measurements(&prometheus).await);
            report.record(
                "Prometheus returns prometheus_build_info",
                build_info(&prometheus).await,
            );
        }
        Err(e) => report.fail("Prometheus is reachable", format!("{:#}", e)),
    }

    report.record("Grafana is online", grafana_online(stack).await);
    report.record("Kibana is green", kibana_green(stack).await);
    report.record("Alerta is reachable", alerta_reachable(stack).await);

    Ok(())
}

async fn measurements(prometheus: &PrometheusClient) -> Result<()> {
    let names = prometheus.all_measurements().await?;
    ensure!(!names.is_empty(), "no metric names returned");
    Ok(())
}

async fn build_info(prometheus: &PrometheusClient) -> Result<()> {
    let samples = prometheus.query("prometheus_build_info").await?;
    ensure!(!samples.is_empty(), "query returned no samples");
    Ok(())
}

async fn grafana_online(stack: &Stack<'_>) -> Result<()> {
    stack.grafana().await?.check_online().await?;
    Ok(())
}

async fn kibana_green(stack: &Stack<'_>) -> Result<()> {
    let status = stack.kibana().await?.status().await?;
    ensure!(
        status.overall.is_green(),
        "overall state is '{}'",
        status.overall.state
    );
    Ok(())
}

async fn alerta_reachable(stack: &Stack<'_>) -> Result<()> {
    let count = stack.alerta().await?.count().await?;
    debug!(total = count.total, "Alerta answered");
    Ok(())
}
