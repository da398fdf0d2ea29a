//! Alertmanager v2 API client.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, instrument};

use stackcheck_core::Result;
use stackcheck_http::HttpClient;

/// An alert as reported by `/api/v2/alerts`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub status: AlertStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub silenced_by: Vec<String>,
    #[serde(default)]
    pub inhibited_by: Vec<String>,
}

impl Alert {
    /// The `alertname` label.
    pub fn name(&self) -> &str {
        self.label("alertname").unwrap_or_default()
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    pub fn instance(&self) -> Option<&str> {
        self.label("instance")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.label("namespace")
    }

    /// The pod the alert is about, from either `pod` or `pod_name`.
    pub fn pod(&self) -> Option<&str> {
        self.label("pod").or_else(|| self.label("pod_name"))
    }

    /// The node the alert is about, from either `node` or `host`.
    pub fn node(&self) -> Option<&str> {
        self.label("node").or_else(|| self.label("host"))
    }

    pub fn severity(&self) -> Option<&str> {
        self.label("severity")
    }

    pub fn is_active(&self) -> bool {
        self.status.state == "active"
    }

    /// `"{alertname} {instance}"`, the identity Alerta keeps for the alert.
    pub fn key(&self) -> String {
        format!("{} {}", self.name(), self.instance().unwrap_or_default())
    }
}

/// Client for the Alertmanager API.
#[derive(Debug, Clone)]
pub struct AlertmanagerClient {
    http: HttpClient,
}

impl AlertmanagerClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Alerts currently firing, excluding silenced and inhibited ones.
    #[instrument(skip(self), fields(base = %self.http.base_url()))]
    pub async fn list_alerts(&self) -> Result<Vec<Alert>> {
        let response = self
            .http
            .get(
                "/api/v2/alerts",
                &[
                    ("active", "true"),
                    ("silenced", "false"),
                    ("inhibited", "false"),
                ],
            )
            .await?;
        let alerts: Vec<Alert> = response.json()?;
        debug!(count = alerts.len(), "Listed alerts");
        Ok(alerts)
    }

    /// Names of the firing alerts, sorted and deduplicated.
    pub async fn firing_alert_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .list_alerts()
            .await?
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_fall_back_between_label_names() {
        let alert: Alert = serde_json::from_value(serde_json::json!({
            "labels": {
                "alertname": "KubePodCrashLooping",
                "pod_name": "fluentd-x1",
                "host": "node-1",
                "severity": "warning"
            },
            "status": {"state": "active", "silencedBy": [], "inhibitedBy": []}
        }))
        .unwrap();

        assert_eq!(alert.name(), "KubePodCrashLooping");
        assert_eq!(alert.pod(), Some("fluentd-x1"));
        assert_eq!(alert.node(), Some("node-1"));
        assert_eq!(alert.instance(), None);
        assert!(alert.is_active());
    }
}
