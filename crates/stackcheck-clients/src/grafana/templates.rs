//! Dashboard templating variables and query expansion.
//!
//! A panel query such as `rate(x{host="$host"}[$rate_interval])` is turned
//! into one concrete query per combination of its variables' values. Three
//! reference forms are recognised: `$name`, `${name}` and `[[name]]`. A
//! `$name` reference always spans the whole word after the dollar sign, so
//! `$hostname` never matches a variable called `host`.

use std::collections::{BTreeMap, HashMap, HashSet};

use regex::Regex;
use tracing::{debug, trace};

use stackcheck_core::error::TemplateError;
use stackcheck_core::{Result, VariableSource};

/// How a variable gets its values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableKind {
    /// A fixed value (`custom`, `interval` and `constant` variables).
    Static(String),
    /// Values from the metrics backend, optionally filtered by a regex.
    Query {
        definition: String,
        regex: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub kind: VariableKind,
}

impl Variable {
    pub fn fixed(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VariableKind::Static(value.into()),
        }
    }

    pub fn query(
        name: impl Into<String>,
        definition: impl Into<String>,
        regex: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: VariableKind::Query {
                definition: definition.into(),
                regex: regex.filter(|r| !r.trim().is_empty()),
            },
        }
    }
}

/// A piece of a query: literal text or a variable reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Var { name: &'a str, raw: &'a str },
}

fn is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn word_len(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| is_word(**b)).count()
}

/// Split `query` into text and variable references.
fn segments(query: &str) -> Vec<Segment<'_>> {
    let bytes = query.as_bytes();
    let mut out = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let found = match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                let len = word_len(&bytes[i + 2..]);
                (len > 0 && bytes.get(i + 2 + len) == Some(&b'}'))
                    .then(|| (i + 2, len, i + 3 + len))
            }
            b'$' => {
                let len = word_len(&bytes[i + 1..]);
                (len > 0).then(|| (i + 1, len, i + 1 + len))
            }
            b'[' if bytes.get(i + 1) == Some(&b'[') => {
                let len = word_len(&bytes[i + 2..]);
                (len > 0 && bytes[i + 2 + len..].starts_with(b"]]"))
                    .then(|| (i + 2, len, i + 4 + len))
            }
            _ => None,
        };

        match found {
            Some((name_start, len, end)) => {
                if text_start < i {
                    out.push(Segment::Text(&query[text_start..i]));
                }
                out.push(Segment::Var {
                    name: &query[name_start..name_start + len],
                    raw: &query[i..end],
                });
                i = end;
                text_start = end;
            }
            None => i += 1,
        }
    }

    if text_start < bytes.len() {
        out.push(Segment::Text(&query[text_start..]));
    }
    out
}

/// Names referenced in `query`, in order of first appearance.
pub fn referenced_names(query: &str) -> Vec<&str> {
    let mut seen = HashSet::new();
    segments(query)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Var { name, .. } => Some(name),
            Segment::Text(_) => None,
        })
        .filter(|name| seen.insert(*name))
        .collect()
}

/// Replace every reference to a variable in `values`; other references are
/// kept as written.
pub fn substitute(query: &str, values: &BTreeMap<String, String>) -> String {
    segments(query)
        .into_iter()
        .map(|s| match s {
            Segment::Text(text) => text,
            Segment::Var { name, raw } => values.get(name).map(String::as_str).unwrap_or(raw),
        })
        .collect()
}

/// The templating variables of one dashboard.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    variables: BTreeMap<String, Variable>,
}

impl TemplateSet {
    pub fn new(variables: impl IntoIterator<Item = Variable>) -> Self {
        Self {
            variables: variables
                .into_iter()
                .map(|v| (v.name.clone(), v))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    /// The variables `query` needs, dependencies first.
    ///
    /// A query variable whose definition references other variables depends
    /// on them.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Cycle`] if the references loop.
    pub fn resolution_order(&self, query: &str) -> Result<Vec<&Variable>> {
        let mut order = Vec::new();
        let mut done = HashSet::new();
        let mut visiting = HashSet::new();
        for name in referenced_names(query) {
            self.visit(name, &mut visiting, &mut done, &mut order)?;
        }
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        name: &str,
        visiting: &mut HashSet<String>,
        done: &mut HashSet<String>,
        order: &mut Vec<&'a Variable>,
    ) -> Result<()> {
        let Some(variable) = self.variables.get(name) else {
            return Ok(());
        };
        if done.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name.to_string()) {
            return Err(TemplateError::Cycle {
                variable: name.to_string(),
            }
            .into());
        }

        if let VariableKind::Query { definition, .. } = &variable.kind {
            for dependency in referenced_names(definition) {
                self.visit(dependency, visiting, done, order)?;
            }
        }

        visiting.remove(name);
        done.insert(name.to_string());
        order.push(variable);
        Ok(())
    }

    /// Expand `query` into every concrete query its variables allow.
    ///
    /// A query without known variables expands to itself. Query variables
    /// are resolved through `source`, once per distinct definition after
    /// substituting the variables they depend on. A variable that resolves to
    /// no values yields no queries at all.
    pub async fn expand(&self, query: &str, source: &dyn VariableSource) -> Result<Vec<String>> {
        let order = self.resolution_order(query)?;
        if order.is_empty() {
            return Ok(vec![query.to_string()]);
        }

        let mut cache: HashMap<String, Vec<String>> = HashMap::new();
        let mut assignments: Vec<BTreeMap<String, String>> = vec![BTreeMap::new()];

        for variable in order {
            let mut next = Vec::new();
            for assignment in &assignments {
                let values = match &variable.kind {
                    VariableKind::Static(value) => vec![value.clone()],
                    VariableKind::Query { definition, regex } => {
                        let resolved = substitute(definition, assignment);
                        if !cache.contains_key(&resolved) {
                            let raw = source.variable_values(&resolved).await?;
                            let filtered = filter_values(&variable.name, regex.as_deref(), raw)?;
                            trace!(variable = %variable.name, definition = %resolved, values = ?filtered, "Resolved variable");
                            cache.insert(resolved.clone(), filtered);
                        }
                        cache.get(&resolved).cloned().unwrap_or_default()
                    }
                };

                for value in values {
                    let mut extended = assignment.clone();
                    extended.insert(variable.name.clone(), value);
                    next.push(extended);
                }
            }
            assignments = next;
        }

        let mut seen = HashSet::new();
        let queries: Vec<String> = assignments
            .iter()
            .map(|values| substitute(query, values))
            .filter(|q| seen.insert(q.clone()))
            .collect();
        debug!(count = queries.len(), "Expanded query");
        Ok(queries)
    }
}

/// Apply a Grafana variable regex (`/.../`) to resolved values.
///
/// The first capture group is kept, or the whole match when the regex has no
/// groups. Values that do not match are dropped.
pub fn filter_values(variable: &str, regex: Option<&str>, values: Vec<String>) -> Result<Vec<String>> {
    let Some(pattern) = regex.map(|r| r.trim().trim_matches('/')).filter(|r| !r.is_empty()) else {
        return Ok(values);
    };
    let re = Regex::new(pattern).map_err(|e| TemplateError::InvalidRegex {
        variable: variable.to_string(),
        regex: pattern.to_string(),
        reason: e.to_string(),
    })?;

    let mut seen = HashSet::new();
    Ok(values
        .iter()
        .filter_map(|value| {
            let caps = re.captures(value)?;
            caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str().to_string())
        })
        .filter(|v| seen.insert(v.clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers definitions from a fixed table and records every call.
    struct TableSource {
        table: HashMap<String, Vec<String>>,
        calls: Mutex<Vec<String>>,
    }

    impl TableSource {
        fn new(entries: Vec<(&str, Vec<&str>)>) -> Self {
            Self {
                table: entries
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.into_iter().map(str::to_string).collect()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VariableSource for TableSource {
        async fn variable_values(&self, query: &str) -> Result<Vec<String>> {
            self.calls.lock().unwrap().push(query.to_string());
            Ok(self.table.get(query).cloned().unwrap_or_default())
        }
    }

    #[test]
    fn recognises_all_reference_forms() {
        let names = referenced_names(r#"rate(x{a="$a",b="${b}",c=~"[[c]]"}[$a])"#);
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn dollar_reference_spans_whole_word() {
        let values = BTreeMap::from([("host".to_string(), "n1".to_string())]);
        assert_eq!(
            substitute("x{h=\"$hostname\",i=\"$host\"}", &values),
            "x{h=\"$hostname\",i=\"n1\"}"
        );
        // Braced form may be followed directly by word characters.
        assert_eq!(substitute("${host}name", &values), "n1name");
    }

    #[test]
    fn unknown_references_and_lone_dollars_are_kept() {
        let values = BTreeMap::new();
        let query = r#"label_replace(up, "instance", "$1", "host", "(.*)") and x{h=~"^$host$"}"#;
        assert_eq!(substitute(query, &values), query);
    }

    #[tokio::test]
    async fn query_without_variables_expands_to_itself() {
        let set = TemplateSet::new([Variable::fixed("rate_interval", "1m")]);
        let source = TableSource::new(vec![]);

        let queries = set.expand("sum(up)", &source).await.unwrap();

        assert_eq!(queries, vec!["sum(up)".to_string()]);
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn expands_cartesian_product() {
        let set = TemplateSet::new([
            Variable::query("host", "label_values(up, host)", None),
            Variable::fixed("rate_interval", "5m"),
            Variable::query("device", "label_values(node_disk_io_time_seconds_total, device)", None),
        ]);
        let source = TableSource::new(vec![
            ("label_values(up, host)", vec!["n1", "n2"]),
            ("label_values(node_disk_io_time_seconds_total, device)", vec!["sda", "sdb", "sdc"]),
        ]);

        let queries = set
            .expand(
                r#"rate(node_disk_io_time_seconds_total{host="$host",device="$device"}[$rate_interval])"#,
                &source,
            )
            .await
            .unwrap();

        assert_eq!(queries.len(), 6);
        assert!(queries.contains(
            &r#"rate(node_disk_io_time_seconds_total{host="n2",device="sdb"}[5m])"#.to_string()
        ));
        assert!(queries.iter().all(|q| !q.contains('$')));
    }

    #[tokio::test]
    async fn dependent_variable_resolved_per_parent_value() {
        let set = TemplateSet::new([
            Variable::query("cluster", "label_values(up, cluster)", None),
            Variable::query("host", r#"label_values(up{cluster="$cluster"}, host)"#, None),
        ]);
        let source = TableSource::new(vec![
            ("label_values(up, cluster)", vec!["a", "b"]),
            (r#"label_values(up{cluster="a"}, host)"#, vec!["a1", "a2"]),
            (r#"label_values(up{cluster="b"}, host)"#, vec!["b1"]),
        ]);

        let queries = set.expand(r#"up{host="$host"}"#, &source).await.unwrap();

        assert_eq!(
            queries,
            vec![
                r#"up{host="a1"}"#.to_string(),
                r#"up{host="a2"}"#.to_string(),
                r#"up{host="b1"}"#.to_string(),
            ]
        );
        assert_eq!(source.calls().len(), 3);
    }

    #[tokio::test]
    async fn shared_definitions_are_resolved_once() {
        let set = TemplateSet::new([
            Variable::query("a", "label_values(x)", None),
            Variable::query("b", "label_values(x)", None),
        ]);
        let source = TableSource::new(vec![("label_values(x)", vec!["1", "2"])]);

        let queries = set.expand("$a + $b", &source).await.unwrap();

        assert_eq!(queries.len(), 4);
        assert_eq!(source.calls(), vec!["label_values(x)".to_string()]);
    }

    #[test]
    fn reference_cycle_is_an_error() {
        let set = TemplateSet::new([
            Variable::query("a", "label_values(x{b=\"$b\"}, a)", None),
            Variable::query("b", "label_values(x{a=\"$a\"}, b)", None),
        ]);
        let err = set.resolution_order("up{a=\"$a\"}").unwrap_err();
        assert!(matches!(
            err,
            stackcheck_core::Error::Template(TemplateError::Cycle { .. })
        ));
    }

    #[test]
    fn regex_keeps_first_group_and_drops_non_matches() {
        let values = vec![
            r#"up{instance="10.0.0.1:9100",job="node"}"#.to_string(),
            r#"up{instance="10.0.0.2:9100",job="node"}"#.to_string(),
            "no_instance".to_string(),
        ];
        let filtered = filter_values("instance", Some(r#"/instance="([^:]+)/"#), values).unwrap();
        assert_eq!(filtered, vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
    }

    #[test]
    fn regex_without_group_keeps_whole_match() {
        let values = vec!["osd.0".to_string(), "mon.a".to_string()];
        let filtered = filter_values("osd", Some("/osd\\.\\d+/"), values).unwrap();
        assert_eq!(filtered, vec!["osd.0".to_string()]);
    }

    #[test]
    fn invalid_regex_is_reported() {
        let err = filter_values("host", Some("/(unclosed/"), vec![]).unwrap_err();
        assert!(err.to_string().contains("host"));
    }

    #[tokio::test]
    async fn empty_variable_yields_no_queries() {
        let set = TemplateSet::new([Variable::query("host", "label_values(host)", None)]);
        let source = TableSource::new(vec![]);
        let queries = set.expand("up{host=\"$host\"}", &source).await.unwrap();
        assert!(queries.is_empty());
    }
}
