//! Grafana dashboard model.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use stackcheck_core::error::TemplateError;
use stackcheck_core::{Result, VariableSource};

use super::templates::{TemplateSet, Variable};

/// Title given to panels that precede any row.
const NO_ROW: &str = "No row";

#[derive(Debug, Deserialize)]
struct RawDashboard {
    meta: RawMeta,
    dashboard: RawBody,
}

#[derive(Debug, Deserialize)]
struct RawMeta {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct RawBody {
    #[serde(default)]
    title: String,
    #[serde(default)]
    rows: Option<Vec<RawRow>>,
    #[serde(default)]
    panels: Option<Vec<RawPanel>>,
    #[serde(default)]
    templating: Option<RawTemplating>,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(default)]
    title: String,
    #[serde(default)]
    panels: Vec<RawPanel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPanel {
    #[serde(default)]
    id: i64,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    targets: Vec<RawTarget>,
    /// Children of a collapsed row.
    #[serde(default)]
    panels: Vec<RawPanel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTarget {
    #[serde(default)]
    ref_id: Option<String>,
    #[serde(default)]
    raw_query: bool,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    expr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTemplating {
    #[serde(default)]
    list: Vec<RawVariable>,
}

#[derive(Debug, Deserialize)]
struct RawVariable {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    query: Value,
    #[serde(default)]
    regex: Option<String>,
    #[serde(default)]
    current: Option<RawCurrent>,
}

#[derive(Debug, Deserialize)]
struct RawCurrent {
    #[serde(default)]
    value: Value,
}

impl RawVariable {
    fn into_variable(self) -> Option<Variable> {
        match self.kind.as_str() {
            "interval" | "custom" | "constant" => {
                let value = match self.current.map(|c| c.value) {
                    Some(Value::Array(items)) => items.into_iter().next(),
                    Some(value) => Some(value),
                    None => None,
                };
                match value {
                    Some(Value::String(s)) => Some(Variable::fixed(self.name, s)),
                    Some(Value::Null) | None => {
                        warn!(variable = %self.name, "Static variable has no current value");
                        None
                    }
                    Some(other) => Some(Variable::fixed(self.name, other.to_string())),
                }
            }
            "query" => {
                let definition = match self.query {
                    Value::String(s) => s,
                    Value::Object(map) => match map.get("query") {
                        Some(Value::String(s)) => s.clone(),
                        _ => return None,
                    },
                    _ => return None,
                };
                Some(Variable::query(self.name, definition, self.regex))
            }
            _ => None,
        }
    }
}

/// One target of one panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelQuery {
    /// `{panel id}:{row}->{panel title}->RefId:{ref id}`.
    pub location: String,
    /// The query as written, variables unexpanded.
    pub query: String,
}

/// A panel located in its row.
#[derive(Debug, Clone)]
struct LocatedPanel {
    row: String,
    panel: RawPanel,
}

/// A dashboard as returned by `/api/dashboards/db/{slug}`.
#[derive(Debug, Clone)]
pub struct Dashboard {
    slug: String,
    title: String,
    panels: Vec<LocatedPanel>,
    templates: TemplateSet,
}

impl Dashboard {
    /// Parse the JSON document Grafana returns for a dashboard.
    ///
    /// Both layouts are understood: legacy `rows[].panels` and flat `panels`
    /// where `row` panels start a new row.
    pub fn from_json(value: Value) -> Result<Self> {
        let raw: RawDashboard =
            serde_json::from_value(value).map_err(|e| TemplateError::MalformedDashboard {
                message: e.to_string(),
            })?;

        let mut panels = Vec::new();
        for row in raw.dashboard.rows.unwrap_or_default() {
            for panel in row.panels {
                panels.push(LocatedPanel {
                    row: row.title.clone(),
                    panel,
                });
            }
        }

        let mut row = NO_ROW.to_string();
        for panel in raw.dashboard.panels.unwrap_or_default() {
            if panel.kind == "row" {
                row = panel.title.clone().unwrap_or_default();
                for child in panel.panels {
                    panels.push(LocatedPanel {
                        row: row.clone(),
                        panel: child,
                    });
                }
            } else {
                panels.push(LocatedPanel {
                    row: row.clone(),
                    panel,
                });
            }
        }

        let templates = TemplateSet::new(
            raw.dashboard
                .templating
                .map(|t| t.list)
                .unwrap_or_default()
                .into_iter()
                .filter_map(RawVariable::into_variable),
        );

        Ok(Self {
            slug: raw.meta.slug,
            title: raw.dashboard.title,
            panels,
            templates,
        })
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    /// Every panel target with its location.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::EmptyTarget`] for a target with neither a raw
    /// query nor an expression.
    pub fn panel_queries(&self) -> Result<Vec<PanelQuery>> {
        let mut queries = Vec::new();
        for located in &self.panels {
            let panel = &located.panel;
            let title = panel
                .title
                .as_deref()
                .filter(|t| !t.is_empty())
                .unwrap_or("n/a");
            let panel_name = format!("{}->{}", located.row, title);

            for target in &panel.targets {
                let ref_id = target.ref_id.as_deref().unwrap_or("A");
                let query = build_query(target).ok_or_else(|| TemplateError::EmptyTarget {
                    panel: panel_name.clone(),
                    ref_id: ref_id.to_string(),
                })?;
                queries.push(PanelQuery {
                    location: format!("{}:{}->RefId:{}", panel.id, panel_name, ref_id),
                    query: query.to_string(),
                });
            }
        }
        Ok(queries)
    }

    /// Expand `query` with this dashboard's templating variables.
    pub async fn expand_query(&self, query: &str, source: &dyn VariableSource) -> Result<Vec<String>> {
        self.templates.expand(query, source).await
    }
}

fn build_query(target: &RawTarget) -> Option<&str> {
    let query = if target.raw_query {
        target.query.as_deref()
    } else {
        target.expr.as_deref()
    };
    query.filter(|q| !q.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grafana::templates::VariableKind;
    use serde_json::json;

    fn flat_dashboard() -> Value {
        json!({
            "meta": {"slug": "system-overview"},
            "dashboard": {
                "title": "System Overview",
                "panels": [
                    {"id": 1, "type": "graph", "title": "Uptime",
                     "targets": [{"expr": "up", "refId": "A"}]},
                    {"id": 2, "type": "row", "title": "CPU"},
                    {"id": 3, "type": "graph", "title": "",
                     "targets": [{"expr": "node_load1{host=\"$host\"}"},
                                 {"expr": "node_load5", "refId": "B"}]},
                    {"id": 4, "type": "row", "title": "Disk", "collapsed": true,
                     "panels": [{"id": 5, "type": "graph", "title": "IO",
                                 "targets": [{"rawQuery": true, "query": "disk_io", "expr": "ignored"}]}]}
                ],
                "templating": {"list": [
                    {"name": "host", "type": "query",
                     "query": "label_values(node_load1, host)", "regex": ""},
                    {"name": "rate_interval", "type": "interval",
                     "current": {"value": "5m"}},
                    {"name": "osd", "type": "custom",
                     "current": {"value": ["osd.0", "osd.1"]}},
                    {"name": "datasource", "type": "datasource", "query": "prometheus"}
                ]}
            }
        })
    }

    #[test]
    fn flat_panels_take_row_titles() {
        let dashboard = Dashboard::from_json(flat_dashboard()).unwrap();
        let locations: Vec<String> = dashboard
            .panel_queries()
            .unwrap()
            .into_iter()
            .map(|q| q.location)
            .collect();

        assert_eq!(
            locations,
            vec![
                "1:No row->Uptime->RefId:A",
                "3:CPU->n/a->RefId:A",
                "3:CPU->n/a->RefId:B",
                "5:Disk->IO->RefId:A",
            ]
        );
    }

    #[test]
    fn raw_query_wins_over_expr() {
        let dashboard = Dashboard::from_json(flat_dashboard()).unwrap();
        let queries = dashboard.panel_queries().unwrap();
        assert_eq!(queries[3].query, "disk_io");
    }

    #[test]
    fn legacy_rows_are_supported() {
        let value = json!({
            "meta": {"slug": "etcd-cluster"},
            "dashboard": {
                "rows": [
                    {"title": "Health", "panels": [
                        {"id": 7, "title": "Leader", "targets": [{"expr": "etcd_server_has_leader"}]}
                    ]}
                ]
            }
        });
        let dashboard = Dashboard::from_json(value).unwrap();
        let queries = dashboard.panel_queries().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].location, "7:Health->Leader->RefId:A");
    }

    #[test]
    fn templating_variables_are_classified() {
        let dashboard = Dashboard::from_json(flat_dashboard()).unwrap();
        let templates = dashboard.templates();

        assert_eq!(
            templates.get("rate_interval").map(|v| &v.kind),
            Some(&VariableKind::Static("5m".to_string()))
        );
        assert_eq!(
            templates.get("osd").map(|v| &v.kind),
            Some(&VariableKind::Static("osd.0".to_string()))
        );
        assert_eq!(
            templates.get("host").map(|v| &v.kind),
            Some(&VariableKind::Query {
                definition: "label_values(node_load1, host)".to_string(),
                regex: None,
            })
        );
        assert!(templates.get("datasource").is_none());
    }

    #[test]
    fn empty_target_names_the_panel() {
        let value = json!({
            "meta": {"slug": "broken"},
            "dashboard": {"panels": [
                {"id": 9, "type": "graph", "title": "Empty", "targets": [{"refId": "C"}]}
            ]}
        });
        let dashboard = Dashboard::from_json(value).unwrap();
        let err = dashboard.panel_queries().unwrap_err();
        assert_eq!(
            err.to_string(),
            "template error: expression/query for the panel 'No row->Empty' at the ref 'C' is empty"
        );
    }

    #[test]
    fn raw_query_target_ignores_expr() {
        let value = json!({
            "meta": {"slug": "raw"},
            "dashboard": {"panels": [
                {"id": 5, "type": "graph", "title": "Raw", "targets": [
                    {"rawQuery": true, "query": "", "expr": "up", "refId": "A"}
                ]}
            ]}
        });
        let dashboard = Dashboard::from_json(value).unwrap();
        let err = dashboard.panel_queries().unwrap_err();
        assert_eq!(
            err.to_string(),
            "template error: expression/query for the panel 'No row->Raw' at the ref 'A' is empty"
        );
    }

    #[test]
    fn missing_meta_is_malformed() {
        let err = Dashboard::from_json(json!({"dashboard": {}})).unwrap_err();
        assert!(matches!(
            err,
            stackcheck_core::Error::Template(TemplateError::MalformedDashboard { .. })
        ));
    }
}
