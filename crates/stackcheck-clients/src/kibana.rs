//! Kibana client, including the Elasticsearch console proxy.
//!
//! Elasticsearch itself is not reachable from outside the cluster network in
//! most deployments, so every index query goes through Kibana's
//! `/api/console/proxy` endpoint.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use stackcheck_core::Result;
use stackcheck_core::error::ProtocolError;
use stackcheck_http::{HttpClient, Request};

const SERVICE: &str = "kibana";

/// Header Kibana requires on every API call.
pub const VERSION_HEADER: &str = "kbn-version";

/// Elasticsearch `_cluster/health` as returned through the proxy.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterHealth {
    pub status: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub active_shards_percent_as_number: f64,
    #[serde(default)]
    pub number_of_nodes: u64,
}

impl ClusterHealth {
    pub fn is_green(&self) -> bool {
        self.status == "green"
    }

    /// True when every shard is active.
    pub fn all_shards_active(&self) -> bool {
        self.active_shards_percent_as_number >= 100.0
    }
}

/// The state of Kibana or one of its plugins.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentState {
    #[serde(default)]
    pub id: String,
    pub state: String,
    #[serde(default)]
    pub message: String,
}

impl ComponentState {
    pub fn is_green(&self) -> bool {
        self.state == "green"
    }
}

/// `/api/status`, reduced to the overall and per-plugin states.
#[derive(Debug, Clone)]
pub struct KibanaStatus {
    pub overall: ComponentState,
    pub plugins: Vec<ComponentState>,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: StatusBody,
}

#[derive(Deserialize)]
struct StatusBody {
    overall: ComponentState,
    #[serde(default)]
    statuses: Vec<ComponentState>,
}

#[derive(Debug, Clone)]
pub struct KibanaClient {
    http: HttpClient,
}

impl KibanaClient {
    /// Wrap a client that already sends the [`VERSION_HEADER`].
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Send `body` to Elasticsearch `path` with `method` through the console
    /// proxy and decode the JSON answer.
    #[instrument(skip(self, body), fields(base = %self.http.base_url()))]
    pub async fn console(&self, path: &str, method: &str, body: &Value) -> Result<Value> {
        let request = Request::post("/api/console/proxy")
            .query("path", path)
            .query("method", method)
            .json(body)?;
        self.http.send(request).await?.json()
    }

    /// Run a `_search` request over all indices.
    pub async fn search(&self, body: &Value) -> Result<Value> {
        self.console("_search", "POST", body).await
    }

    pub async fn elasticsearch_health(&self) -> Result<ClusterHealth> {
        let value = self.console("_cluster/health", "GET", &json!({})).await?;
        serde_json::from_value(value).map_err(|e| unexpected(e.to_string()))
    }

    #[instrument(skip(self), fields(base = %self.http.base_url()))]
    pub async fn status(&self) -> Result<KibanaStatus> {
        let response: StatusResponse = self.http.get("/api/status", &[]).await?.json()?;
        Ok(KibanaStatus {
            overall: response.status.overall,
            plugins: response.status.statuses,
        })
    }

    /// Distinct values of `field`, via a terms aggregation of up to `size`
    /// buckets.
    pub async fn terms(&self, field: &str, size: u32) -> Result<Vec<String>> {
        let body = json!({
            "size": 0,
            "aggs": {"uniq": {"terms": {"field": field, "size": size}}}
        });
        let output = self.search(&body).await?;
        let buckets = output
            .pointer("/aggregations/uniq/buckets")
            .and_then(Value::as_array)
            .ok_or_else(|| unexpected(format!("no terms buckets for '{}'", field)))?;

        let keys: Vec<String> = buckets
            .iter()
            .filter_map(|b| match b.get("key") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
                None => None,
            })
            .collect();
        debug!(field, count = keys.len(), "Collected terms");
        Ok(keys)
    }

    /// Titles of the dashboards saved in Kibana's own index.
    pub async fn saved_dashboards(&self) -> Result<Vec<String>> {
        let body = json!({"size": 1000, "query": {"match": {"type": "dashboard"}}});
        let output = self.search(&body).await?;
        let hits = output
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .ok_or_else(|| unexpected("missing 'hits'".to_string()))?;

        Ok(hits
            .iter()
            .filter_map(|hit| hit.pointer("/_source/dashboard/title"))
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }
}

fn unexpected(message: String) -> stackcheck_core::Error {
    ProtocolError::UnexpectedPayload {
        service: SERVICE.to_string(),
        message,
    }
    .into()
}
