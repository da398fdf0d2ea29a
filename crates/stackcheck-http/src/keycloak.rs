//! Keycloak (OpenID Connect) identity provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use stackcheck_core::config::DEFAULT_REQUEST_TIMEOUT;
use stackcheck_core::error::{AuthError, TransportError};
use stackcheck_core::{Credentials, IdentityProvider, RefreshToken, Result, TokenSet};

/// Realm the stack's clients are registered in.
pub const DEFAULT_REALM: &str = "iam";

/// OpenID client id used by the stack's proxies.
pub const DEFAULT_CLIENT_ID: &str = "sl";

/// Keycloak connection options.
#[derive(Debug, Clone)]
pub struct KeycloakConfig {
    pub realm: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub danger_accept_invalid_certs: bool,
    pub timeout: Duration,
}

impl Default for KeycloakConfig {
    fn default() -> Self {
        Self {
            realm: DEFAULT_REALM.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_secret: None,
            danger_accept_invalid_certs: false,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    username: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    refresh_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

/// Which grant failed, for error reporting.
#[derive(Clone, Copy, Debug)]
enum Grant {
    Password,
    Refresh,
}

impl Grant {
    fn error(self, reason: String) -> AuthError {
        match self {
            Grant::Password => AuthError::LoginFailed { reason },
            Grant::Refresh => AuthError::RefreshFailed { reason },
        }
    }
}

/// Obtains session tokens from a Keycloak realm's token endpoint.
#[derive(Debug, Clone)]
pub struct KeycloakProvider {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
}

impl KeycloakProvider {
    /// Create a provider for the Keycloak server at `server`.
    ///
    /// The token endpoint is `{server}/auth/realms/{realm}/protocol/openid-connect/token`.
    pub fn new(server: &Url, config: KeycloakConfig) -> Result<Self> {
        if config.danger_accept_invalid_certs {
            warn!(server = %server, "TLS certificate verification is disabled for Keycloak");
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("stackcheck/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
            .build()
            .map_err(|e| TransportError::Other {
                message: e.to_string(),
            })?;

        let token_url = format!(
            "{}/auth/realms/{}/protocol/openid-connect/token",
            server.as_str().trim_end_matches('/'),
            config.realm
        );

        Ok(Self {
            client,
            token_url,
            client_id: config.client_id,
            client_secret: config.client_secret,
        })
    }

    /// Returns the token endpoint URL.
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    async fn exchange<F: Serialize + ?Sized>(&self, form: &F, grant: Grant) -> Result<TokenSet> {
        let response = self
            .client
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| grant.error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    err.error_description
                        .or(err.error)
                        .unwrap_or_else(|| "no error description".to_string())
                ),
                Err(_) => format!("HTTP {}", status.as_u16()),
            };
            return Err(grant.error(reason).into());
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| grant.error(format!("malformed token response: {}", e)))?;

        Ok(TokenSet::new(tokens.access_token, tokens.refresh_token))
    }
}

#[async_trait]
impl IdentityProvider for KeycloakProvider {
    #[instrument(skip_all, fields(token_url = %self.token_url, username = %credentials.username()))]
    async fn login(&self, credentials: &Credentials) -> Result<TokenSet> {
        debug!("Requesting token with password grant");
        let form = PasswordGrant {
            grant_type: "password",
            client_id: &self.client_id,
            username: credentials.username(),
            password: credentials.password(),
            client_secret: self.client_secret.as_deref(),
        };
        self.exchange(&form, Grant::Password).await
    }

    #[instrument(skip_all, fields(token_url = %self.token_url))]
    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenSet> {
        debug!("Requesting token with refresh grant");
        let form = RefreshGrant {
            grant_type: "refresh_token",
            client_id: &self.client_id,
            refresh_token: refresh_token.as_str(),
            client_secret: self.client_secret.as_deref(),
        };
        self.exchange(&form, Grant::Refresh).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_url_follows_realm_layout() {
        let server = Url::parse("https://iam.example:8443/").unwrap();
        let provider = KeycloakProvider::new(&server, KeycloakConfig::default()).unwrap();
        assert_eq!(
            provider.token_url(),
            "https://iam.example:8443/auth/realms/iam/protocol/openid-connect/token"
        );
    }

    #[test]
    fn token_url_keeps_server_path() {
        let server = Url::parse("https://gw.example/keycloak").unwrap();
        let config = KeycloakConfig {
            realm: "ops".to_string(),
            ..KeycloakConfig::default()
        };
        let provider = KeycloakProvider::new(&server, config).unwrap();
        assert_eq!(
            provider.token_url(),
            "https://gw.example/keycloak/auth/realms/ops/protocol/openid-connect/token"
        );
    }
}
