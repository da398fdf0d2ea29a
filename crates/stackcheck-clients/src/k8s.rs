//! Kubernetes API client.
//!
//! Talks plain REST to the API server with a bearer token; only the handful
//! of list endpoints the checks need are covered.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use stackcheck_core::Result;
use stackcheck_http::HttpClient;

/// Page size for list calls.
const PAGE_LIMIT: &str = "500";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMeta {
    #[serde(rename = "continue", default)]
    continue_token: Option<String>,
}

#[derive(Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    metadata: Option<ListMeta>,
}

/// Where a service can be reached from inside the cluster network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct Service {
    metadata: ObjectMeta,
    spec: ServiceSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceSpec {
    #[serde(rename = "clusterIP", default)]
    cluster_ip: Option<String>,
    #[serde(default)]
    ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, Deserialize)]
struct ServicePort {
    port: u16,
}

impl Service {
    fn endpoint(&self) -> Option<ServiceEndpoint> {
        let ip = self
            .spec
            .cluster_ip
            .as_deref()
            .filter(|ip| !ip.is_empty() && *ip != "None")?;
        let port = self.spec.ports.first()?.port;
        Some(ServiceEndpoint {
            ip: ip.to_string(),
            port,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Node {
    metadata: ObjectMeta,
    #[serde(default)]
    status: NodeStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct NodeStatus {
    #[serde(default)]
    addresses: Vec<NodeAddress>,
}

#[derive(Debug, Clone, Deserialize)]
struct NodeAddress {
    #[serde(rename = "type")]
    kind: String,
    address: String,
}

/// A node's addresses by type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeAddresses {
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub node_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodStatus {
    #[serde(default)]
    pub phase: String,
}

/// Replica counts common to every workload kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub desired: i64,
    pub ready: i64,
    pub updated: i64,
    pub unavailable: i64,
}

impl Readiness {
    /// Every desired replica is ready and up to date.
    pub fn is_complete(&self) -> bool {
        self.ready >= self.desired && self.updated >= self.desired && self.unavailable == 0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSet {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: DaemonSetStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonSetStatus {
    #[serde(default)]
    pub current_number_scheduled: i64,
    #[serde(default)]
    pub desired_number_scheduled: i64,
    #[serde(default)]
    pub number_available: i64,
    #[serde(default)]
    pub number_misscheduled: i64,
    #[serde(default)]
    pub number_ready: i64,
    #[serde(default)]
    pub number_unavailable: i64,
    #[serde(default)]
    pub updated_number_scheduled: i64,
}

impl DaemonSet {
    pub fn readiness(&self) -> Readiness {
        Readiness {
            desired: self.status.desired_number_scheduled,
            ready: self.status.number_ready,
            updated: self.status.updated_number_scheduled,
            unavailable: self.status.number_unavailable,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Deployment {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: DeploymentSpec,
    #[serde(default)]
    pub status: DeploymentStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeploymentSpec {
    #[serde(default)]
    pub replicas: Option<i64>,
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub replicas: i64,
    #[serde(default)]
    pub ready_replicas: i64,
    #[serde(default)]
    pub available_replicas: i64,
    #[serde(default)]
    pub unavailable_replicas: i64,
    #[serde(default)]
    pub updated_replicas: i64,
}

impl Deployment {
    pub fn readiness(&self) -> Readiness {
        Readiness {
            desired: self.spec.replicas.unwrap_or(1),
            ready: self.status.available_replicas,
            updated: self.status.updated_replicas,
            unavailable: self.status.unavailable_replicas,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatefulSet {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: StatefulSetSpec,
    #[serde(default)]
    pub status: StatefulSetStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatefulSetSpec {
    #[serde(default)]
    pub replicas: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub replicas: i64,
    #[serde(default)]
    pub ready_replicas: i64,
    #[serde(default)]
    pub current_replicas: i64,
    #[serde(default)]
    pub updated_replicas: i64,
    #[serde(default)]
    pub current_revision: Option<String>,
    #[serde(default)]
    pub update_revision: Option<String>,
}

impl StatefulSet {
    /// Replica counts; a rollout still in progress counts its stale replicas
    /// as not updated.
    pub fn readiness(&self) -> Readiness {
        let desired = self.spec.replicas.unwrap_or(1);
        let updated = if self.status.current_revision == self.status.update_revision {
            self.status.current_replicas
        } else {
            self.status.updated_replicas
        };
        Readiness {
            desired,
            ready: self.status.ready_replicas,
            updated,
            unavailable: (desired - self.status.ready_replicas).max(0),
        }
    }
}

/// Client for the Kubernetes API server.
#[derive(Debug, Clone)]
pub struct K8sClient {
    http: HttpClient,
}

impl K8sClient {
    /// Wrap a client that sends the cluster bearer token.
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Services of `namespace` by name.
    ///
    /// Headless services and services without ports are skipped.
    #[instrument(skip(self))]
    pub async fn services(&self, namespace: &str) -> Result<BTreeMap<String, ServiceEndpoint>> {
        let services: Vec<Service> = self
            .list(&format!("/api/v1/namespaces/{}/services", namespace))
            .await?;

        let mut endpoints = BTreeMap::new();
        for service in services {
            match service.endpoint() {
                Some(endpoint) => {
                    endpoints.insert(service.metadata.name, endpoint);
                }
                None => debug!(service = %service.metadata.name, "Skipping service without cluster IP or ports"),
            }
        }
        Ok(endpoints)
    }

    /// A single service's endpoint, or `None` if it does not exist or
    /// cannot be addressed.
    #[instrument(skip(self))]
    pub async fn service_endpoint(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceEndpoint>> {
        let path = format!("/api/v1/namespaces/{}/services/{}", namespace, name);
        let service: Service = match self.http.get(&path, &[]).await {
            Ok(response) => response.json()?,
            Err(e) if e.is_not_found() => {
                warn!("Service not found");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        Ok(service.endpoint())
    }

    /// Cluster nodes by name.
    #[instrument(skip(self))]
    pub async fn nodes(&self) -> Result<BTreeMap<String, NodeAddresses>> {
        let nodes: Vec<Node> = self.list("/api/v1/nodes").await?;
        Ok(nodes
            .into_iter()
            .map(|node| {
                let find = |kind: &str| {
                    node.status
                        .addresses
                        .iter()
                        .find(|a| a.kind == kind)
                        .map(|a| a.address.clone())
                };
                let addresses = NodeAddresses {
                    internal_ip: find("InternalIP"),
                    external_ip: find("ExternalIP"),
                };
                (node.metadata.name, addresses)
            })
            .collect())
    }

    /// Pods in `namespace`, or across all namespaces.
    pub async fn pods(&self, namespace: Option<&str>) -> Result<Vec<Pod>> {
        self.list(&core_path(namespace, "pods")).await
    }

    pub async fn daemonsets(&self, namespace: Option<&str>) -> Result<Vec<DaemonSet>> {
        self.list(&apps_path(namespace, "daemonsets")).await
    }

    pub async fn deployments(&self, namespace: Option<&str>) -> Result<Vec<Deployment>> {
        self.list(&apps_path(namespace, "deployments")).await
    }

    pub async fn statefulsets(&self, namespace: Option<&str>) -> Result<Vec<StatefulSet>> {
        self.list(&apps_path(namespace, "statefulsets")).await
    }

    /// Fetch every page of a list endpoint.
    async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut query = vec![("limit", PAGE_LIMIT)];
            if let Some(token) = token.as_deref() {
                query.push(("continue", token));
            }
            let page: List<T> = self.http.get(path, &query).await?.json()?;
            items.extend(page.items);

            token = page
                .metadata
                .and_then(|m| m.continue_token)
                .filter(|t| !t.is_empty());
            if token.is_none() {
                break;
            }
        }

        debug!(path, count = items.len(), "Listed objects");
        Ok(items)
    }
}

fn core_path(namespace: Option<&str>, resource: &str) -> String {
    match namespace {
        Some(ns) => format!("/api/v1/namespaces/{}/{}", ns, resource),
        None => format!("/api/v1/{}", resource),
    }
}

fn apps_path(namespace: Option<&str>, resource: &str) -> String {
    match namespace {
        Some(ns) => format!("/apis/apps/v1/namespaces/{}/{}", ns, resource),
        None => format!("/apis/apps/v1/{}", resource),
    }
}
