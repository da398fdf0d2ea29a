//! Log pipeline checks through Kibana.

use anyhow::{Result, ensure};
use tracing::info;

use stackcheck_clients::KibanaClient;

use crate::catalog::{HOST_FIELD, KIBANA_DASHBOARDS, POD_NAME_FIELD, TERMS_SIZE};
use crate::context::Stack;
use crate::report::{Report, ensure_none_missing};

pub async fn run(stack: &Stack<'_>, report: &mut Report) -> Result<()> {
    let kibana = stack.kibana().await?;

    report.record("Elasticsearch cluster is green", elasticsearch_green(&kibana).await);
    report.record("Kibana plugins are green", plugins_green(&kibana).await);
    report.record("Every pod ships logs", pods_ship_logs(stack, &kibana).await);
    report.record("Every node ships logs", nodes_ship_logs(stack, &kibana).await);
    report.record("Kibana dashboards are present", dashboards_present(&kibana).await);

    Ok(())
}

async fn elasticsearch_green(kibana: &KibanaClient) -> Result<()> {
    let health = kibana.elasticsearch_health().await?;
    info!(cluster = %health.cluster_name, status = %health.status, "Elasticsearch health");
    ensure!(
        health.is_green(),
        "status is '{}', expected 'green'",
        health.status
    );
    ensure!(
        health.all_shards_active(),
        "only {}% of shards are active",
        health.active_shards_percent_as_number
    );
    Ok(())
}

async fn plugins_green(kibana: &KibanaClient) -> Result<()> {
    let status = kibana.status().await?;
    ensure!(
        status.overall.is_green(),
        "overall state is '{}'",
        status.overall.state
    );
    let degraded: Vec<String> = status
        .plugins
        .iter()
        .filter(|p| !p.is_green())
        .map(|p| format!("{} is '{}'", p.id, p.state))
        .collect();
    ensure_none_missing("Plugins not green", &degraded)
}

async fn pods_ship_logs(stack: &Stack<'_>, kibana: &KibanaClient) -> Result<()> {
    let pods = stack.k8s().pods(None).await?;
    let loggers = kibana.terms(POD_NAME_FIELD, TERMS_SIZE).await?;
    let harness = stack.settings().test_pod.as_deref();

    let missing: Vec<String> = pods
        .into_iter()
        .map(|pod| pod.metadata.name)
        .filter(|name| Some(name.as_str()) != harness && !loggers.contains(name))
        .collect();
    ensure_none_missing("No logs from pods", &missing)
}

async fn nodes_ship_logs(stack: &Stack<'_>, kibana: &KibanaClient) -> Result<()> {
    let nodes = stack.k8s().nodes().await?;
    let hosts = kibana.terms(HOST_FIELD, TERMS_SIZE).await?;
    info!(found = ?hosts, "Nodes with logs");

    let expected = nodes.len();
    let missing: Vec<String> = nodes
        .into_keys()
        .filter(|node| !hosts.contains(node))
        .collect();
    ensure_none_missing(
        &format!(
            "Logs found for {} of {} nodes, missing",
            expected - missing.len(),
            expected
        ),
        &missing,
    )
}

async fn dashboards_present(kibana: &KibanaClient) -> Result<()> {
    let saved = kibana.saved_dashboards().await?;
    let missing: Vec<String> = KIBANA_DASHBOARDS
        .iter()
        .filter(|title| !saved.iter().any(|s| s.as_str() == **title))
        .map(|title| title.to_string())
        .collect();
    ensure_none_missing("Kibana dashboards missing", &missing)
}
