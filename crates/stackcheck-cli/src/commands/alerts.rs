//! Alert state checks across Prometheus, Alertmanager and Alerta.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::{Result, bail, ensure};
use tokio::time::{Instant, sleep};
use tracing::warn;

use stackcheck_clients::alerta::AlertaAlert;
use stackcheck_clients::alertmanager::Alert;
use stackcheck_clients::{AlertmanagerClient, PrometheusClient};

use crate::catalog::{ALERT_EXPRESSIONS, EXPECTED_FIRING, PENDING_ALERTS_QUERY, WATCHDOG};
use crate::context::Stack;
use crate::report::{Report, ensure_none_missing};

/// Alerta lags behind Alertmanager; poll this long for them to agree.
const SYNC_INTERVAL: Duration = Duration::from_secs(30);
const SYNC_TIMEOUT: Duration = Duration::from_secs(6 * 60);

pub async fn run(stack: &Stack<'_>, report: &mut Report) -> Result<()> {
    let prometheus = stack.prometheus().await?;
    let alertmanager = stack.alertmanager().await?;

    let defined = match prometheus.defined_alerts().await {
        Ok(defined) => defined,
        Err(e) => {
            report.fail("Alerting rules are readable", e.to_string());
            BTreeMap::new()
        }
    };

    let watchdog_check = "Watchdog is firing";
    if defined.contains_key(WATCHDOG) {
        report.record(watchdog_check, watchdog(&prometheus, &alertmanager).await);
    } else {
        report.skip(watchdog_check, "Watchdog rule is not defined");
    }

    match active_alerts(&prometheus, &alertmanager).await {
        Ok(active) => {
            for (alert, exprs) in ALERT_EXPRESSIONS {
                let check = format!("Alert {} has data or is active", alert);
                if !defined.contains_key(*alert) {
                    report.skip(check, "not defined in Prometheus");
                    continue;
                }
                report.record(check, alert_has_data(&prometheus, &active, alert, exprs).await);
            }
        }
        Err(e) => report.fail("Alert expressions", format!("{:#}", e)),
    }

    let firing_check = "No unexpected alerts are firing";
    if stack.settings().test_firing_alerts {
        report.record(firing_check, no_unexpected_alerts(&alertmanager).await);
    } else {
        report.skip(firing_check, "TEST_FIRING_ALERTS is not set");
    }

    report.record(
        "Alerta agrees with Alertmanager",
        alerta_consistent(stack, &alertmanager).await,
    );
    Ok(())
}

async fn watchdog(prometheus: &PrometheusClient, alertmanager: &AlertmanagerClient) -> Result<()> {
    let firing = alertmanager.firing_alert_names().await?;
    ensure!(
        firing.iter().any(|name| name == WATCHDOG),
        "Watchdog should always fire, firing alerts: [{}]",
        firing.join(", ")
    );
    ensure!(
        !prometheus.query("vector(1)").await?.is_empty(),
        "Watchdog expression 'vector(1)' returned nothing"
    );
    Ok(())
}

/// Names of the alerts that are firing in Alertmanager or pending in Prometheus.
async fn active_alerts(
    prometheus: &PrometheusClient,
    alertmanager: &AlertmanagerClient,
) -> Result<BTreeSet<String>> {
    let mut active: BTreeSet<String> =
        alertmanager.firing_alert_names().await?.into_iter().collect();
    let pending = prometheus.query(PENDING_ALERTS_QUERY).await?;
    active.extend(
        pending
            .iter()
            .filter_map(|sample| sample.label("alertname"))
            .map(str::to_string),
    );
    Ok(active)
}

/// Every expression behind `alert` returns data, unless the alert is active.
async fn alert_has_data(
    prometheus: &PrometheusClient,
    active: &BTreeSet<String>,
    alert: &str,
    exprs: &[&str],
) -> Result<()> {
    let mut empty = Vec::new();
    for expr in exprs {
        if prometheus.query(expr).await?.is_empty() {
            warn!(alert, expr, "Alert expression returned no data");
            empty.push(*expr);
        }
    }
    if empty.is_empty() || active.contains(alert) {
        return Ok(());
    }
    bail!(
        "'{}' returned no data and {} is neither firing nor pending; check the alert definition",
        empty.join("', '"),
        alert
    )
}

async fn no_unexpected_alerts(alertmanager: &AlertmanagerClient) -> Result<()> {
    let mut alerts = alertmanager.list_alerts().await?;
    alerts.sort_by(|a, b| a.name().cmp(b.name()));

    for alert in &alerts {
        warn!(
            name = alert.name(),
            pod = alert.pod().unwrap_or_default(),
            namespace = alert.namespace().unwrap_or_default(),
            node = alert.node().unwrap_or_default(),
            "Firing alert"
        );
    }

    let unexpected: Vec<String> = alerts
        .iter()
        .map(|a| a.name().to_string())
        .filter(|name| !EXPECTED_FIRING.contains(&name.as_str()))
        .collect();
    ensure_none_missing("Alerts firing in the cluster", &unexpected)
}

/// Open Alerta alerts and active Alertmanager alerts describe the same set.
async fn alerta_consistent(stack: &Stack<'_>, alertmanager: &AlertmanagerClient) -> Result<()> {
    let alerta = stack.alerta().await?;
    let started = Instant::now();

    loop {
        let in_alerta: BTreeSet<String> = alerta
            .alerts(&[("status", "open")])
            .await?
            .iter()
            .map(AlertaAlert::key)
            .collect();
        let in_alertmanager: BTreeSet<String> = alertmanager
            .list_alerts()
            .await?
            .iter()
            .map(Alert::key)
            .collect();

        if in_alerta == in_alertmanager {
            return Ok(());
        }

        let only_alerta = join(in_alerta.difference(&in_alertmanager));
        let only_alertmanager = join(in_alertmanager.difference(&in_alerta));
        warn!(%only_alerta, %only_alertmanager, "Alerta and Alertmanager disagree");

        if started.elapsed() + SYNC_INTERVAL > SYNC_TIMEOUT {
            bail!(
                "inconsistent after {}s; only in Alerta: [{}]; only in Alertmanager: [{}]",
                started.elapsed().as_secs(),
                only_alerta,
                only_alertmanager
            );
        }
        sleep(SYNC_INTERVAL).await;
    }
}

fn join<'a>(keys: impl Iterator<Item = &'a String>) -> String {
    keys.map(String::as_str).collect::<Vec<_>>().join(", ")
}
