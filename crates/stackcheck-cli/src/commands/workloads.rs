//! Readiness of the stack's workloads.

use anyhow::{Context, Result};

use stackcheck_clients::k8s::Readiness;

use crate::context::Stack;
use crate::report::Report;

pub async fn run(stack: &Stack<'_>, report: &mut Report) -> Result<()> {
    let namespace = Some(stack.settings().namespace.as_str());
    let k8s = stack.k8s();

    let daemonsets = k8s
        .daemonsets(namespace)
        .await
        .context("Failed to list daemonsets")?;
    for ds in &daemonsets {
        check(report, "daemonset", &ds.metadata.name, ds.readiness());
    }

    let deployments = k8s
        .deployments(namespace)
        .await
        .context("Failed to list deployments")?;
    for deployment in &deployments {
        if deployment.spec.paused {
            report.skip(
                format!("deployment {} is ready", deployment.metadata.name),
                "rollout paused",
            );
            continue;
        }
        check(
            report,
            "deployment",
            &deployment.metadata.name,
            deployment.readiness(),
        );
    }

    let statefulsets = k8s
        .statefulsets(namespace)
        .await
        .context("Failed to list statefulsets")?;
    for sts in &statefulsets {
        check(report, "statefulset", &sts.metadata.name, sts.readiness());
    }

    Ok(())
}

fn check(report: &mut Report, kind: &str, name: &str, readiness: Readiness) {
    let check = format!("{} {} is ready", kind, name);
    if readiness.is_complete() {
        report.pass(check);
    } else {
        report.fail(
            check,
            format!(
                "{} of {} ready, {} updated, {} unavailable",
                readiness.ready, readiness.desired, readiness.updated, readiness.unavailable
            ),
        );
    }
}
