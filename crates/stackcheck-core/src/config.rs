//! Harness settings.
//!
//! Settings are read once at startup and passed by reference to whatever
//! needs them. Nothing else in the workspace reads the process environment.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::Credentials;
use crate::error::ConfigError;

/// Default namespace of the monitored stack.
pub const DEFAULT_NAMESPACE: &str = "stacklight";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default `kbn-version` header value.
pub const DEFAULT_KIBANA_VERSION: &str = "7.1.0";

/// Identity provider login settings.
#[derive(Debug, Clone)]
pub struct KeycloakSettings {
    pub url: Url,
    pub credentials: Credentials,
}

/// Everything the harness needs to know about its environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Cluster API server URL.
    pub cluster_url: Url,
    /// Bearer token for the cluster API.
    pub cluster_token: String,
    /// Namespace the stack's services live in.
    pub namespace: String,
    /// Console log level.
    pub log_level: String,
    /// Log file path.
    pub log_file: PathBuf,
    /// Identity provider login, when all of its variables are set.
    pub keycloak: Option<KeycloakSettings>,
    /// Name of the pod running the harness, excluded from log checks.
    pub test_pod: Option<String>,
    /// Skip TLS certificate verification.
    pub insecure_tls: bool,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Fail the alerts check when anything besides Watchdog fires.
    pub test_firing_alerts: bool,
    /// Value sent in the `kbn-version` header.
    pub kibana_version: String,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary lookup function.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let require = |name: &str| {
            get(name).ok_or_else(|| ConfigError::Missing {
                name: name.to_string(),
            })
        };

        let cluster_url = parse_url("URL", &require("URL")?)?;
        let cluster_token = require("TOKEN")?;

        let keycloak = match (
            get("KEYCLOAK_URL"),
            get("KEYCLOAK_USER"),
            get("KEYCLOAK_PASSWORD"),
        ) {
            (Some(url), Some(user), Some(password)) => Some(KeycloakSettings {
                url: parse_url("KEYCLOAK_URL", &url)?,
                credentials: Credentials::new(user, password),
            }),
            _ => None,
        };

        let request_timeout = match get("SL_REQUEST_TIMEOUT") {
            Some(value) => {
                let secs: u64 = value.trim().parse().map_err(|e: std::num::ParseIntError| {
                    ConfigError::Invalid {
                        name: "SL_REQUEST_TIMEOUT".to_string(),
                        value: value.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Duration::from_secs(secs)
            }
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        Ok(Self {
            cluster_url,
            cluster_token,
            namespace: get("SL_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "debug".to_string()),
            log_file: get("LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("test.log")),
            keycloak,
            test_pod: get("SL_TEST_POD"),
            insecure_tls: parse_bool("SL_INSECURE_TLS", get("SL_INSECURE_TLS"))?,
            request_timeout,
            test_firing_alerts: parse_bool("TEST_FIRING_ALERTS", get("TEST_FIRING_ALERTS"))?,
            kibana_version: get("KIBANA_VERSION")
                .unwrap_or_else(|| DEFAULT_KIBANA_VERSION.to_string()),
        })
    }
}

fn parse_url(name: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Invalid {
        name: name.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(name: &str, value: Option<String>) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name: name.to_string(),
            value,
            reason: "expected a boolean".to_string(),
        }),
    }
}
