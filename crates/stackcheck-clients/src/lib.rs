//! stackcheck-clients - API clients for a deployed observability stack.
//!
//! Every client wraps a [`stackcheck_http::HttpClient`] bound to the
//! service's base URL, so session handling and retries are shared.
//!
//! # Example
//!
//! ```no_run
//! use stackcheck_clients::PrometheusClient;
//! use stackcheck_core::BaseUrl;
//! use stackcheck_http::HttpClient;
//!
//! # async fn example() -> Result<(), stackcheck_core::Error> {
//! let http = HttpClient::builder(BaseUrl::new("http://10.0.0.7:9090/")?)
//!     .build()
//!     .await?;
//! let prometheus = PrometheusClient::new(http);
//! let samples = prometheus.query("prometheus_build_info").await?;
//! assert!(!samples.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod alerta;
pub mod alertmanager;
pub mod grafana;
pub mod k8s;
pub mod kibana;
pub mod prometheus;

pub use alerta::AlertaClient;
pub use alertmanager::AlertmanagerClient;
pub use grafana::GrafanaClient;
pub use k8s::K8sClient;
pub use kibana::KibanaClient;
pub use prometheus::PrometheusClient;
