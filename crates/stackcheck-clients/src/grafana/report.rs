//! Per-panel results of running a dashboard's queries.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, instrument, warn};

use stackcheck_core::{Error, Result};

use super::dashboard::{Dashboard, PanelQuery};
use crate::prometheus::PrometheusClient;

/// Outcome of a whole panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PanelStatus {
    Passed,
    PartiallyFailed,
    Failed,
    Skipped,
}

impl fmt::Display for PanelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PanelStatus::Passed => "Passed",
            PanelStatus::PartiallyFailed => "Partially failed",
            PanelStatus::Failed => "Failed",
            PanelStatus::Skipped => "Skipped",
        };
        f.write_str(s)
    }
}

/// Raw panel queries whose failures are expected on some deployments.
#[derive(Debug, Clone, Default)]
pub struct IgnoreLists {
    /// Queries allowed to fail for every combination of variables.
    pub for_fail: HashSet<String>,
    /// Queries allowed to fail for some combinations.
    pub for_partial_fail: HashSet<String>,
}

impl IgnoreLists {
    pub fn new<I, J, S, T>(for_fail: I, for_partial_fail: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            for_fail: for_fail.into_iter().map(Into::into).collect(),
            for_partial_fail: for_partial_fail.into_iter().map(Into::into).collect(),
        }
    }
}

/// The concrete queries run for one panel target and whether each returned
/// data.
#[derive(Debug, Clone)]
pub struct PanelReport {
    pub location: String,
    pub raw_query: String,
    queries: Vec<(String, bool)>,
}

impl PanelReport {
    pub fn new(location: impl Into<String>, raw_query: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            raw_query: raw_query.into(),
            queries: Vec::new(),
        }
    }

    /// Record the outcome of one concrete query.
    pub fn record(&mut self, query: impl Into<String>, passed: bool) {
        self.queries.push((query.into(), passed));
    }

    pub fn queries(&self) -> &[(String, bool)] {
        &self.queries
    }

    /// A panel whose variables expanded to nothing ran no queries and is
    /// skipped.
    pub fn status(&self, ignore: &IgnoreLists) -> PanelStatus {
        if self.queries.is_empty() {
            return PanelStatus::Skipped;
        }
        let failed = self.queries.iter().filter(|(_, ok)| !ok).count();

        if failed == 0 {
            PanelStatus::Passed
        } else if failed == self.queries.len() {
            if ignore.for_fail.contains(&self.raw_query) {
                PanelStatus::Skipped
            } else {
                PanelStatus::Failed
            }
        } else if ignore.for_partial_fail.contains(&self.raw_query) {
            PanelStatus::Skipped
        } else {
            PanelStatus::PartiallyFailed
        }
    }

    pub fn failed_queries(&self) -> impl Iterator<Item = &str> {
        self.queries
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(q, _)| q.as_str())
    }
}

impl fmt::Display for PanelReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location \"{}\" \t Query \"{}\"", self.location, self.raw_query)?;
        let failed: Vec<&str> = self.failed_queries().collect();
        if !failed.is_empty() {
            write!(f, "\n    Failed queries:\n    {}", failed.join("\n    "))?;
        }
        Ok(())
    }
}

/// All panel reports of one dashboard.
#[derive(Debug, Clone)]
pub struct DashboardReport {
    pub slug: String,
    pub panels: Vec<PanelReport>,
}

impl DashboardReport {
    /// Panels with the given status.
    pub fn with_status<'a>(
        &'a self,
        status: PanelStatus,
        ignore: &'a IgnoreLists,
    ) -> impl Iterator<Item = &'a PanelReport> + 'a {
        self.panels
            .iter()
            .filter(move |p| p.status(ignore) == status)
    }

    /// No panel failed, fully or partially.
    pub fn is_ok(&self, ignore: &IgnoreLists) -> bool {
        self.panels.iter().all(|p| {
            !matches!(
                p.status(ignore),
                PanelStatus::Failed | PanelStatus::PartiallyFailed
            )
        })
    }

    /// Multi-line summary grouped by status.
    pub fn summary(&self, ignore: &IgnoreLists) -> String {
        let mut out = String::new();
        for (heading, status) in [
            ("Passed panels", PanelStatus::Passed),
            ("Ignored panels", PanelStatus::Skipped),
            ("Failed panels", PanelStatus::Failed),
            ("Partially failed panels", PanelStatus::PartiallyFailed),
        ] {
            out.push_str(heading);
            out.push_str(":\n");
            for panel in self.with_status(status, ignore) {
                out.push_str("  ");
                out.push_str(&panel.to_string());
                out.push('\n');
            }
        }
        out
    }
}

/// Expand and run every panel query of `dashboard` against Prometheus.
///
/// A concrete query passes when it returns at least one sample. Query errors
/// reported by Prometheus (bad expression, failed status) count as failures;
/// transport and authentication errors abort the run.
#[instrument(skip_all, fields(dashboard = %dashboard.slug()))]
pub async fn run_dashboard(
    dashboard: &Dashboard,
    prometheus: &PrometheusClient,
) -> Result<DashboardReport> {
    let mut panels = Vec::new();
    for PanelQuery { location, query } in dashboard.panel_queries()? {
        let mut report = PanelReport::new(&location, &query);

        for concrete in dashboard.expand_query(&query, prometheus).await? {
            let passed = match prometheus.query(&concrete).await {
                Ok(samples) => !samples.is_empty(),
                Err(e @ (Error::Http(_) | Error::Protocol(_))) => {
                    warn!(location = %location, query = %concrete, error = %e, "Query failed");
                    false
                }
                Err(e) => return Err(e),
            };
            report.record(concrete, passed);
        }

        debug!(location = %location, queries = report.queries().len(), "Panel checked");
        panels.push(report);
    }

    Ok(DashboardReport {
        slug: dashboard.slug().to_string(),
        panels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel(results: &[bool]) -> PanelReport {
        let mut report = PanelReport::new("1:No row->Load->RefId:A", "node_load1{host=\"$host\"}");
        for (i, ok) in results.iter().enumerate() {
            report.record(format!("node_load1{{host=\"n{}\"}}", i), *ok);
        }
        report
    }

    #[test]
    fn status_follows_query_outcomes() {
        let ignore = IgnoreLists::default();
        assert_eq!(panel(&[true, true]).status(&ignore), PanelStatus::Passed);
        assert_eq!(panel(&[false, false]).status(&ignore), PanelStatus::Failed);
        assert_eq!(
            panel(&[true, false]).status(&ignore),
            PanelStatus::PartiallyFailed
        );
        assert_eq!(panel(&[]).status(&ignore), PanelStatus::Skipped);
    }

    #[test]
    fn ignore_lists_turn_failures_into_skips() {
        let raw = "node_load1{host=\"$host\"}";
        let fail_only = IgnoreLists::new([raw], Vec::<String>::new());
        assert_eq!(panel(&[false, false]).status(&fail_only), PanelStatus::Skipped);
        assert_eq!(
            panel(&[true, false]).status(&fail_only),
            PanelStatus::PartiallyFailed
        );

        let partial_only = IgnoreLists::new(Vec::<String>::new(), [raw]);
        assert_eq!(panel(&[true, false]).status(&partial_only), PanelStatus::Skipped);
        assert_eq!(panel(&[false]).status(&partial_only), PanelStatus::Failed);
    }

    #[test]
    fn status_display_matches_report_wording() {
        assert_eq!(PanelStatus::PartiallyFailed.to_string(), "Partially failed");
    }

    #[test]
    fn dashboard_report_summary_groups_panels() {
        let ignore = IgnoreLists::default();
        let report = DashboardReport {
            slug: "system".to_string(),
            panels: vec![panel(&[true]), panel(&[false])],
        };
        assert!(!report.is_ok(&ignore));
        let summary = report.summary(&ignore);
        assert!(summary.contains("Failed panels:\n  Location"));
        assert!(summary.contains("Failed queries:\n    node_load1{host=\"n0\"}"));
    }
}
