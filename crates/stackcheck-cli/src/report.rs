//! Check results of one run.

use anyhow::Result;
use tracing::{info, warn};

use crate::output;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub outcome: Outcome,
}

/// Collects check outcomes and prints each as it is recorded.
#[derive(Debug, Default)]
pub struct Report {
    results: Vec<CheckResult>,
    quiet: bool,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// A report that records without printing.
    #[cfg(test)]
    fn silent() -> Self {
        Self {
            results: Vec::new(),
            quiet: true,
        }
    }

    pub fn pass(&mut self, name: impl Into<String>) {
        self.push(name.into(), Outcome::Passed);
    }

    pub fn fail(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.push(name.into(), Outcome::Failed(reason.into()));
    }

    pub fn skip(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.push(name.into(), Outcome::Skipped(reason.into()));
    }

    /// Pass on `Ok`, fail with the full error chain on `Err`.
    pub fn record(&mut self, name: impl Into<String>, result: Result<()>) {
        match result {
            Ok(()) => self.pass(name),
            Err(e) => self.fail(name, format!("{:#}", e)),
        }
    }

    #[cfg(test)]
    fn results(&self) -> &[CheckResult] {
        &self.results
    }

    pub fn failures(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }

    /// Print the tally of passed, failed and skipped checks, then the names
    /// of the failed ones.
    pub fn print_summary(&self) {
        output::summary(
            self.count(|o| *o == Outcome::Passed),
            self.failures(),
            self.count(|o| matches!(o, Outcome::Skipped(_))),
        );
        for result in &self.results {
            if let Outcome::Failed(_) = result.outcome {
                output::failed(&result.name, "");
            }
        }
    }

    fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|r| predicate(&r.outcome)).count()
    }

    fn push(&mut self, name: String, outcome: Outcome) {
        match &outcome {
            Outcome::Passed => info!(check = %name, "Check passed"),
            Outcome::Failed(reason) => warn!(check = %name, reason = %reason, "Check failed"),
            Outcome::Skipped(reason) => info!(check = %name, reason = %reason, "Check skipped"),
        }
        if !self.quiet {
            match &outcome {
                Outcome::Passed => output::passed(&name),
                Outcome::Failed(reason) => output::failed(&name, reason),
                Outcome::Skipped(reason) => output::skipped(&name, reason),
            }
        }
        self.results.push(CheckResult { name, outcome });
    }
}

/// Fail with `what` followed by the missing items, if there are any.
pub fn ensure_none_missing(what: &str, missing: &[String]) -> Result<()> {
    if missing.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{}: {}", what, missing.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_maps_errors_to_failures() {
        let mut report = Report::silent();
        report.record("first", Ok(()));
        report.record(
            "second",
            Err(anyhow::anyhow!("inner").context("outer")),
        );
        report.skip("third", "disabled");

        assert_eq!(report.failures(), 1);
        assert!(!report.is_success());
        assert_eq!(
            report.results()[1].outcome,
            Outcome::Failed("outer: inner".to_string())
        );
    }

    #[test]
    fn skips_do_not_fail_the_run() {
        let mut report = Report::silent();
        report.skip("firing alerts", "TEST_FIRING_ALERTS is not set");
        assert!(report.is_success());
    }

    #[test]
    fn missing_items_are_listed() {
        assert!(ensure_none_missing("Missing", &[]).is_ok());
        let err = ensure_none_missing("Missing", &["a".to_string(), "b".to_string()]).unwrap_err();
        assert_eq!(err.to_string(), "Missing: a, b");
    }
}
