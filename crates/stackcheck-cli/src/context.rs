//! Service discovery and client construction.
//!
//! The stack's services are found by listing the services of the configured
//! namespace through the cluster API; every client then talks to the
//! service's cluster IP and first port.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use stackcheck_clients::k8s::ServiceEndpoint;
use stackcheck_clients::kibana::VERSION_HEADER;
use stackcheck_clients::{
    AlertaClient, AlertmanagerClient, GrafanaClient, K8sClient, KibanaClient, PrometheusClient,
};
use stackcheck_core::{BaseUrl, Settings};
use stackcheck_http::HttpClient;

pub const PROMETHEUS_SERVICE: &str = "prometheus-server";
pub const ALERTMANAGER_SERVICE: &str = "prometheus-alertmanager";
pub const GRAFANA_SERVICE: &str = "grafana";
pub const KIBANA_SERVICE: &str = "kibana";
pub const ALERTA_SERVICE: &str = "alerta";

/// The cluster API plus the discovered services of the stack.
pub struct Stack<'a> {
    settings: &'a Settings,
    k8s: K8sClient,
    services: BTreeMap<String, ServiceEndpoint>,
}

impl<'a> Stack<'a> {
    /// Connect to the cluster API and discover the stack's services.
    #[instrument(skip_all, fields(cluster = %settings.cluster_url, namespace = %settings.namespace))]
    pub async fn connect(settings: &'a Settings) -> Result<Self> {
        let base = BaseUrl::new(settings.cluster_url.as_str()).context("Invalid cluster URL")?;
        let http = HttpClient::builder(base)
            .bearer_token(&settings.cluster_token)
            .timeout(settings.request_timeout)
            .danger_accept_invalid_certs(settings.insecure_tls)
            .build()
            .await
            .context("Failed to create the cluster API client")?;
        let k8s = K8sClient::new(http);

        let services = k8s.services(&settings.namespace).await.with_context(|| {
            format!(
                "Failed to list services in namespace '{}'",
                settings.namespace
            )
        })?;
        debug!(services = ?services.keys().collect::<Vec<_>>(), "Discovered services");

        Ok(Self {
            settings,
            k8s,
            services,
        })
    }

    pub fn settings(&self) -> &Settings {
        self.settings
    }

    pub fn k8s(&self) -> &K8sClient {
        &self.k8s
    }

    pub async fn prometheus(&self) -> Result<PrometheusClient> {
        Ok(PrometheusClient::new(
            self.service_http(PROMETHEUS_SERVICE, &[]).await?,
        ))
    }

    pub async fn alertmanager(&self) -> Result<AlertmanagerClient> {
        Ok(AlertmanagerClient::new(
            self.service_http(ALERTMANAGER_SERVICE, &[]).await?,
        ))
    }

    pub async fn grafana(&self) -> Result<GrafanaClient> {
        Ok(GrafanaClient::new(
            self.service_http(GRAFANA_SERVICE, &[]).await?,
        ))
    }

    pub async fn kibana(&self) -> Result<KibanaClient> {
        let headers = [(VERSION_HEADER, self.settings.kibana_version.as_str())];
        Ok(KibanaClient::new(
            self.service_http(KIBANA_SERVICE, &headers).await?,
        ))
    }

    pub async fn alerta(&self) -> Result<AlertaClient> {
        Ok(AlertaClient::new(
            self.service_http(ALERTA_SERVICE, &[]).await?,
        ))
    }

    /// Build a client for a discovered service, logging in through Keycloak
    /// when it is configured.
    async fn service_http(&self, name: &str, headers: &[(&str, &str)]) -> Result<HttpClient> {
        let endpoint = self.services.get(name).with_context(|| {
            format!(
                "Service '{}' not found in namespace '{}'",
                name, self.settings.namespace
            )
        })?;
        let base = BaseUrl::from_host_port("http", &endpoint.ip, endpoint.port)
            .with_context(|| format!("Invalid endpoint for service '{}'", name))?;

        let mut builder = HttpClient::builder(base)
            .timeout(self.settings.request_timeout)
            .danger_accept_invalid_certs(self.settings.insecure_tls);
        for (header, value) in headers {
            builder = builder.header(*header, *value);
        }
        if let Some(keycloak) = &self.settings.keycloak {
            builder = builder.keycloak(keycloak.credentials.clone(), keycloak.url.clone());
        }

        builder
            .build()
            .await
            .with_context(|| format!("Failed to connect to {}", name))
    }
}
