//! Grafana API client, dashboard model and panel query expansion.

mod dashboard;
mod report;
mod templates;

pub use dashboard::{Dashboard, PanelQuery};
pub use report::{DashboardReport, IgnoreLists, PanelReport, PanelStatus, run_dashboard};
pub use templates::{
    TemplateSet, Variable, VariableKind, filter_values, referenced_names, substitute,
};

use serde::Deserialize;
use tracing::{debug, instrument};

use stackcheck_core::Result;
use stackcheck_http::HttpClient;

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    uri: String,
    #[serde(rename = "type", default)]
    kind: String,
}

/// Client for the Grafana HTTP API.
#[derive(Debug, Clone)]
pub struct GrafanaClient {
    http: HttpClient,
}

impl GrafanaClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Succeeds if both the login page and the organisation API answer.
    #[instrument(skip(self), fields(base = %self.http.base_url()))]
    pub async fn check_online(&self) -> Result<()> {
        self.http.get("/login", &[]).await?;
        self.http.get("/api/org", &[]).await?;
        debug!("Grafana is online");
        Ok(())
    }

    /// Fetch and parse a dashboard by slug.
    #[instrument(skip(self), fields(base = %self.http.base_url()))]
    pub async fn dashboard(&self, slug: &str) -> Result<Dashboard> {
        let response = self
            .http
            .get(&format!("/api/dashboards/db/{}", slug), &[])
            .await?;
        Dashboard::from_json(response.json()?)
    }

    /// Returns false if Grafana answers 404 for the slug.
    pub async fn dashboard_exists(&self, slug: &str) -> Result<bool> {
        match self
            .http
            .get(&format!("/api/dashboards/db/{}", slug), &[])
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Slugs of every dashboard, taken from the `db/<slug>` search URIs.
    pub async fn dashboard_names(&self) -> Result<Vec<String>> {
        let hits: Vec<SearchHit> = self.http.get("/api/search", &[]).await?.json()?;
        Ok(hits
            .into_iter()
            .filter(|h| h.kind.is_empty() || h.kind == "dash-db")
            .map(|h| h.uri.replacen("db/", "", 1))
            .collect())
    }
}
