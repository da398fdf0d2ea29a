//! Alerta console API client.

use serde::Deserialize;
use tracing::instrument;

use stackcheck_core::Result;
use stackcheck_http::HttpClient;

/// Placeholder Alerta stores for an empty resource.
const EMPTY_RESOURCE: &str = "n/a";

/// Response of `/api/alerts/count`.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertCount {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub total: u64,
    #[serde(rename = "statusCounts", default)]
    pub status_counts: std::collections::BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertaAlert {
    #[serde(default)]
    pub id: String,
    pub event: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub environment: String,
}

impl AlertaAlert {
    /// `"{event} {resource}"`, with Alerta's `n/a` resource left empty so it
    /// lines up with Alertmanager's `"{alertname} {instance}"`.
    pub fn key(&self) -> String {
        format!("{} {}", self.event, self.resource.replace(EMPTY_RESOURCE, ""))
    }
}

#[derive(Deserialize)]
struct AlertsResponse {
    #[serde(default)]
    alerts: Vec<AlertaAlert>,
}

#[derive(Debug, Clone)]
pub struct AlertaClient {
    http: HttpClient,
}

impl AlertaClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    #[instrument(skip(self), fields(base = %self.http.base_url()))]
    pub async fn count(&self) -> Result<AlertCount> {
        self.http.get("/api/alerts/count", &[]).await?.json()
    }

    /// Alerts matching the given filters, e.g. `[("status", "open")]`.
    #[instrument(skip(self), fields(base = %self.http.base_url()))]
    pub async fn alerts(&self, filters: &[(&str, &str)]) -> Result<Vec<AlertaAlert>> {
        let response: AlertsResponse = self.http.get("/api/alerts", filters).await?.json()?;
        Ok(response.alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_blanks_missing_resource() {
        let alert: AlertaAlert = serde_json::from_value(serde_json::json!({
            "event": "Watchdog",
            "resource": "n/a"
        }))
        .unwrap();
        assert_eq!(alert.key(), "Watchdog ");
    }
}
