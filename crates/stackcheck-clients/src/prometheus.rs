//! Prometheus HTTP API client.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use stackcheck_core::error::{ProtocolError, TemplateError};
use stackcheck_core::{Result, VariableSource};
use stackcheck_http::{HttpClient, Request, Response};

const SERVICE: &str = "prometheus";

/// Metric name of the synthetic series Prometheus keeps for alert states.
const ALERTS_SERIES: &str = "ALERTS";

/// Grafana built-in variables and the values they are pinned to.
const BUILTINS: &[(&str, &str)] = &[
    ("$__range", "1h"),
    ("${__range_s}", "3600"),
    ("$topx", "5"),
    ("$ident", "instance_name"),
];

const LABEL_VALUES_PATTERN: &str =
    r"^label_values\(((?P<query>[\w:]*(\{.*\})?),\s*)?(?P<label>[\w$]*)\)";
const QUERY_RESULT_PATTERN: &str = r"^query_result\((?P<query>.*)\)";

/// Replace the Grafana built-in variables with fixed values.
///
/// ```
/// use stackcheck_clients::prometheus::prepare_query;
///
/// assert_eq!(
///     prepare_query("topk($topx, rate(x[$__range]))"),
///     "topk(5, rate(x[1h]))"
/// );
/// ```
pub fn prepare_query(query: &str) -> String {
    BUILTINS
        .iter()
        .fold(query.to_string(), |q, (from, to)| q.replace(from, to))
}

/// A timestamped value as Prometheus encodes it: `[<unix seconds>, "<value>"]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SamplePoint(pub f64, pub String);

/// One series of a query result.
///
/// Instant vectors fill `value`; range queries fill `values`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    #[serde(default)]
    pub value: Option<SamplePoint>,
    #[serde(default)]
    pub values: Vec<SamplePoint>,
}

impl Sample {
    /// Returns the metric name, if the series still carries one.
    pub fn name(&self) -> Option<&str> {
        self.label("__name__")
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.metric.get(name).map(String::as_str)
    }

    /// Returns the instant value as Prometheus rendered it.
    pub fn value_str(&self) -> Option<&str> {
        self.value.as_ref().map(|p| p.1.as_str())
    }

    pub fn value_f64(&self) -> Option<f64> {
        self.value_str().and_then(|v| v.parse().ok())
    }

    /// Render the series as `name{label="value",...}`.
    pub fn selector(&self) -> String {
        let labels: Vec<String> = self
            .metric
            .iter()
            .filter(|(k, _)| k.as_str() != "__name__")
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect();
        format!("{}{{{}}}", self.name().unwrap_or_default(), labels.join(","))
    }
}

/// A scrape target from `/api/v1/targets`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub scrape_pool: String,
    #[serde(default)]
    pub scrape_url: String,
    #[serde(default)]
    pub health: String,
    #[serde(default)]
    pub last_error: String,
}

impl Target {
    pub fn is_up(&self) -> bool {
        self.health == "up"
    }
}

/// An Alertmanager instance Prometheus sends alerts to.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertmanagerEndpoint {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleGroup {
    pub name: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// An alerting or recording rule.
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub query: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl Rule {
    pub fn is_alerting(&self) -> bool {
        self.kind == "alerting"
    }
}

/// An alerting rule as configured in Prometheus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedAlert {
    pub query: String,
    pub severity: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    result: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetsData {
    #[serde(default)]
    active_targets: Vec<Target>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertmanagersData {
    #[serde(default)]
    active_alertmanagers: Vec<AlertmanagerEndpoint>,
}

#[derive(Deserialize)]
struct RulesData {
    #[serde(default)]
    groups: Vec<RuleGroup>,
}

/// Client for the Prometheus HTTP API.
///
/// The set of metric names is fetched once and cached for the lifetime of the
/// client.
#[derive(Debug)]
pub struct PrometheusClient {
    http: HttpClient,
    measurements: OnceCell<BTreeSet<String>>,
}

impl PrometheusClient {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            measurements: OnceCell::new(),
        }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Run an instant query at the current time.
    pub async fn query(&self, query: &str) -> Result<Vec<Sample>> {
        self.query_at(query, None).await
    }

    /// Run an instant query, optionally at a fixed evaluation time.
    ///
    /// Grafana built-in variables are replaced first, see [`prepare_query`].
    #[instrument(skip(self), fields(base = %self.http.base_url()))]
    pub async fn query_at(&self, query: &str, time: Option<DateTime<Utc>>) -> Result<Vec<Sample>> {
        let mut request = Request::get("/api/v1/query").query("query", prepare_query(query));
        if let Some(time) = time {
            request = request.query("time", time.to_rfc3339());
        }
        let data: QueryData = decode(&self.http.send(request).await?)?;
        let samples = samples_from(data)?;
        debug!(count = samples.len(), "Query returned");
        Ok(samples)
    }

    /// Run a range query; each series carries its points in `values`.
    #[instrument(skip(self), fields(base = %self.http.base_url()))]
    pub async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<Sample>> {
        let request = Request::get("/api/v1/query_range")
            .query("query", prepare_query(query))
            .query("start", start.to_rfc3339())
            .query("end", end.to_rfc3339())
            .query("step", format!("{}s", step.as_secs().max(1)));
        let data: QueryData = decode(&self.http.send(request).await?)?;
        samples_from(data)
    }

    /// Label sets of the series matching any of `matches`.
    pub async fn series(&self, matches: &[&str]) -> Result<Vec<BTreeMap<String, String>>> {
        let pairs: Vec<(&str, &str)> = matches.iter().map(|m| ("match[]", *m)).collect();
        let response = self.http.get("/api/v1/series", &pairs).await?;
        decode(&response)
    }

    /// All values of `label` across the database.
    pub async fn label_values(&self, label: &str) -> Result<Vec<String>> {
        let response = self
            .http
            .get(&format!("/api/v1/label/{}/values", label), &[])
            .await?;
        decode(&response)
    }

    /// Delete the series matching any of `matches`.
    #[instrument(skip(self))]
    pub async fn delete_series(&self, matches: &[&str]) -> Result<()> {
        let pairs: Vec<(&str, &str)> = matches.iter().map(|m| ("match[]", *m)).collect();
        self.http.delete("/api/v1/series", &pairs).await?;
        info!("Series deleted");
        Ok(())
    }

    pub async fn targets(&self) -> Result<Vec<Target>> {
        let response = self.http.get("/api/v1/targets", &[]).await?;
        let data: TargetsData = decode(&response)?;
        Ok(data.active_targets)
    }

    pub async fn alertmanagers(&self) -> Result<Vec<AlertmanagerEndpoint>> {
        let response = self.http.get("/api/v1/alertmanagers", &[]).await?;
        let data: AlertmanagersData = decode(&response)?;
        Ok(data.active_alertmanagers)
    }

    pub async fn rules(&self) -> Result<Vec<RuleGroup>> {
        let response = self.http.get("/api/v1/rules", &[]).await?;
        let data: RulesData = decode(&response)?;
        Ok(data.groups)
    }

    /// Alerting rules by name, across all rule groups.
    pub async fn defined_alerts(&self) -> Result<BTreeMap<String, DefinedAlert>> {
        let alerts = self
            .rules()
            .await?
            .into_iter()
            .flat_map(|group| group.rules)
            .filter(Rule::is_alerting)
            .map(|rule| {
                let severity = rule.labels.get("severity").cloned();
                (
                    rule.name,
                    DefinedAlert {
                        query: rule.query,
                        severity,
                    },
                )
            })
            .collect();
        Ok(alerts)
    }

    /// Every metric name known to Prometheus, except `ALERTS`.
    ///
    /// Fetched on first use and cached.
    pub async fn all_measurements(&self) -> Result<&BTreeSet<String>> {
        self.measurements
            .get_or_try_init(|| async {
                let mut names: BTreeSet<String> =
                    self.label_values("__name__").await?.into_iter().collect();
                names.remove(ALERTS_SERIES);
                debug!(count = names.len(), "Cached metric names");
                Ok(names)
            })
            .await
    }

    /// The metric name mentioned in `query`.
    ///
    /// When several known names occur in the query the longest wins, so
    /// `node_load15` is preferred over `node_load1`.
    pub async fn parse_measurement(&self, query: &str) -> Result<Option<String>> {
        let found = self
            .all_measurements()
            .await?
            .iter()
            .filter(|name| query.contains(name.as_str()))
            .max_by_key(|name| name.len())
            .cloned();
        Ok(found)
    }

    /// Poll `query` until its first sample's value equals `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::WaitTimedOut`] if the value does not show up
    /// within `timeout`; query errors are returned as they happen.
    #[instrument(skip(self))]
    pub async fn wait_for_value(
        &self,
        query: &str,
        expected: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<()> {
        let started = Instant::now();
        loop {
            let samples = self.query(query).await?;
            match samples.first().and_then(Sample::value_str) {
                Some(value) if value == expected => return Ok(()),
                Some(value) => debug!(value, "Value not reached yet"),
                None => warn!("Empty result, check the query"),
            }

            if started.elapsed() + interval > timeout {
                return Err(ProtocolError::WaitTimedOut {
                    waited_secs: started.elapsed().as_secs(),
                    message: format!("'{}' never returned '{}'", query, expected),
                }
                .into());
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn label_values_query(&self, definition: &str) -> Result<Vec<String>> {
        let captures = template_regex(LABEL_VALUES_PATTERN)?
            .captures(definition)
            .ok_or_else(|| unsupported(definition))?;
        let label = captures
            .name("label")
            .map(|m| m.as_str())
            .filter(|l| !l.is_empty())
            .ok_or_else(|| unsupported(definition))?;

        match captures.name("query").map(|m| m.as_str()) {
            None | Some("") => self.label_values(label).await,
            Some(query) => {
                let values: BTreeSet<String> = self
                    .query(query)
                    .await?
                    .into_iter()
                    .filter_map(|s| s.metric.get(label).filter(|v| !v.is_empty()).cloned())
                    .collect();
                Ok(values.into_iter().collect())
            }
        }
    }

    async fn query_result_query(&self, definition: &str) -> Result<Vec<String>> {
        let captures = template_regex(QUERY_RESULT_PATTERN)?
            .captures(definition)
            .ok_or_else(|| unsupported(definition))?;
        let query = captures
            .name("query")
            .map(|m| m.as_str())
            .ok_or_else(|| unsupported(definition))?;
        Ok(self
            .query(query)
            .await?
            .iter()
            .map(Sample::selector)
            .collect())
    }
}

#[async_trait]
impl VariableSource for PrometheusClient {
    /// Supports `label_values([query,] label)` and `query_result(query)`.
    async fn variable_values(&self, query: &str) -> Result<Vec<String>> {
        let definition = query.trim();
        if definition.starts_with("label_values") {
            self.label_values_query(definition).await
        } else if definition.starts_with("query_result") {
            self.query_result_query(definition).await
        } else {
            Err(unsupported(definition))
        }
    }
}

fn decode<T: DeserializeOwned>(response: &Response) -> Result<T> {
    let envelope: Envelope<T> = response.json()?;
    if envelope.status != "success" {
        let message = match (envelope.error_type, envelope.error) {
            (Some(kind), Some(error)) => format!("{}: {}", kind, error),
            (_, Some(error)) => error,
            _ => response.text().into_owned(),
        };
        return Err(ProtocolError::QueryFailed {
            service: SERVICE.to_string(),
            message,
        }
        .into());
    }
    envelope.data.ok_or_else(|| {
        ProtocolError::UnexpectedPayload {
            service: SERVICE.to_string(),
            message: "missing 'data'".to_string(),
        }
        .into()
    })
}

fn samples_from(data: QueryData) -> Result<Vec<Sample>> {
    let invalid = |e: serde_json::Error| ProtocolError::UnexpectedPayload {
        service: SERVICE.to_string(),
        message: format!("bad {} result: {}", data.result_type, e),
    };
    match data.result_type.as_str() {
        "vector" | "matrix" => Ok(serde_json::from_value(data.result.clone()).map_err(invalid)?),
        "scalar" | "string" => {
            let point: SamplePoint = serde_json::from_value(data.result.clone()).map_err(invalid)?;
            Ok(vec![Sample {
                value: Some(point),
                ..Sample::default()
            }])
        }
        other => Err(ProtocolError::UnexpectedPayload {
            service: SERVICE.to_string(),
            message: format!("unknown result type '{}'", other),
        }
        .into()),
    }
}

fn template_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        TemplateError::InvalidRegex {
            variable: String::new(),
            regex: pattern.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn unsupported(query: &str) -> stackcheck_core::Error {
    TemplateError::UnsupportedQuery {
        query: query.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_replaced() {
        assert_eq!(
            prepare_query("sum(increase(x[$__range])) * ${__range_s} by ($ident)"),
            "sum(increase(x[1h])) * 3600 by (instance_name)"
        );
        assert_eq!(prepare_query("up"), "up");
    }

    #[test]
    fn selector_renders_labels() {
        let sample: Sample = serde_json::from_value(serde_json::json!({
            "metric": {"__name__": "up", "job": "node", "instance": "n1:9100"},
            "value": [1700000000.0, "1"]
        }))
        .unwrap();
        assert_eq!(sample.selector(), r#"up{instance="n1:9100",job="node"}"#);
        assert_eq!(sample.value_f64(), Some(1.0));
    }

    #[test]
    fn scalar_result_becomes_single_sample() {
        let data = QueryData {
            result_type: "scalar".to_string(),
            result: serde_json::json!([1700000000.0, "42"]),
        };
        let samples = samples_from(data).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value_str(), Some("42"));
        assert!(samples[0].metric.is_empty());
    }

    #[test]
    fn label_values_pattern_matches_both_forms() {
        let re = template_regex(LABEL_VALUES_PATTERN).unwrap();

        let caps = re.captures("label_values(node_load1{job=\"node\"}, host)").unwrap();
        assert_eq!(&caps["query"], "node_load1{job=\"node\"}");
        assert_eq!(&caps["label"], "host");

        let caps = re.captures("label_values(host)").unwrap();
        assert!(caps.name("query").is_none());
        assert_eq!(&caps["label"], "host");
    }
}
