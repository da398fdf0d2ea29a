//! Authenticated HTTP client.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, instrument, trace, warn};
use url::Url;

use stackcheck_core::config::DEFAULT_REQUEST_TIMEOUT;
use stackcheck_core::error::{Error, HttpError, InvalidInputError, TransportError};
use stackcheck_core::{AccessToken, BaseUrl, Credentials, IdentityProvider, Result};

use crate::keycloak::{KeycloakConfig, KeycloakProvider};
use crate::request::{Request, Response};
use crate::session::AuthSession;

/// Attempts per request while the session keeps reporting expiry.
pub const MAX_ATTEMPTS: u32 = 3;

/// Body text the identity-aware proxy serves instead of the API once the
/// session has expired.
pub const DEFAULT_AUTH_EXPIRED_MARKER: &str = "IAM realm";

/// HTTP client bound to one base URL.
///
/// When built with an identity provider, the client logs in up front, sends
/// the access token as a session cookie, and transparently refreshes it when a
/// response signals an expired session (HTTP 401, or a successful response
/// containing the auth-expired marker). Each request is attempted at most
/// [`MAX_ATTEMPTS`] times.
///
/// Clones share the same session.
///
/// # Example
///
/// ```no_run
/// use stackcheck_core::BaseUrl;
/// use stackcheck_http::HttpClient;
///
/// # async fn example() -> Result<(), stackcheck_core::Error> {
/// let base = BaseUrl::new("http://10.0.0.7:9090/")?;
/// let client = HttpClient::builder(base).build().await?;
/// let response = client.get("/api/v1/query", &[("query", "up")]).await?;
/// println!("{}", response.text());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    client: reqwest::Client,
    base: BaseUrl,
    headers: HeaderMap,
    session: Option<AuthSession>,
    auth_expired_marker: String,
    timeout: Duration,
}

/// What to do with a response.
enum Outcome {
    Done,
    SessionExpired,
    Failed,
}

impl HttpClient {
    /// Start building a client for `base`.
    pub fn builder(base: BaseUrl) -> HttpClientBuilder {
        HttpClientBuilder::new(base)
    }

    /// Returns the base URL requests are resolved against.
    pub fn base_url(&self) -> &BaseUrl {
        &self.inner.base
    }

    /// Returns true if the client holds an identity provider session.
    pub fn is_authenticated(&self) -> bool {
        self.inner.session.is_some()
    }

    /// Returns the current session access token, if authenticated.
    pub async fn access_token(&self) -> Option<AccessToken> {
        match &self.inner.session {
            Some(session) => Some(session.access_token().await),
            None => None,
        }
    }

    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Response> {
        self.send(Request::get(path).query_pairs(query)).await
    }

    pub async fn post(&self, path: &str, body: Option<String>) -> Result<Response> {
        self.send(with_body(Request::post(path), body)).await
    }

    pub async fn put(&self, path: &str, body: Option<String>) -> Result<Response> {
        self.send(with_body(Request::put(path), body)).await
    }

    pub async fn delete(&self, path: &str, query: &[(&str, &str)]) -> Result<Response> {
        self.send(Request::delete(path).query_pairs(query)).await
    }

    /// Perform a request, refreshing the session between attempts while it
    /// reports expiry.
    ///
    /// # Errors
    ///
    /// - [`Error::Http`] for any other non-success status, with the body attached
    /// - [`Error::Auth`] if a token refresh fails
    /// - [`Error::ExhaustedRetries`] if all attempts report an expired session
    /// - [`Error::Transport`] on network failure, timeout, or cancellation
    #[instrument(skip(self, request), fields(base = %self.inner.base, method = %request.method(), path = request.path()))]
    pub async fn send(&self, request: Request) -> Result<Response> {
        let url = self.inner.base.join(request.path())?;
        debug!(%url, "Sending request");
        if let Some(body) = request.body_text() {
            trace!(body, "request body");
        }

        for attempt in 1..=MAX_ATTEMPTS {
            let response = self.execute(&url, &request).await?;
            trace!(attempt, status = response.status(), "response received");

            match self.classify(&response) {
                Outcome::Done => return Ok(response),
                Outcome::Failed => {
                    return Err(HttpError::new(response.status(), response.text()).into());
                }
                Outcome::SessionExpired => {
                    if attempt == MAX_ATTEMPTS {
                        break;
                    }
                    if let Some(session) = &self.inner.session {
                        warn!(attempt, "Session expired, refreshing token");
                        session.refresh().await?;
                    }
                }
            }
        }

        Err(Error::ExhaustedRetries {
            attempts: MAX_ATTEMPTS,
        })
    }

    fn classify(&self, response: &Response) -> Outcome {
        if self.inner.session.is_some()
            && (response.status() == 401
                || (response.is_success()
                    && response.body_contains(&self.inner.auth_expired_marker)))
        {
            return Outcome::SessionExpired;
        }

        if response.is_success() {
            Outcome::Done
        } else {
            Outcome::Failed
        }
    }

    /// Issue one attempt and read the whole body.
    async fn execute(&self, url: &Url, request: &Request) -> Result<Response> {
        let timeout = request.request_timeout().unwrap_or(self.inner.timeout);

        let mut builder = self
            .inner
            .client
            .request(request.method().clone(), url.clone())
            .headers(self.inner.headers.clone())
            .timeout(timeout);

        if !request.query_params().is_empty() {
            builder = builder.query(request.query_params());
        }
        if let Some(body) = request.body_text() {
            builder = builder.body(body.to_string());
        }
        if let Some(session) = &self.inner.session {
            let cookie = header_value(COOKIE.as_str(), &session.cookie().await)?;
            builder = builder.header(COOKIE, cookie);
        }

        let call = async move {
            let response = builder
                .send()
                .await
                .map_err(|e| transport_error(e, timeout))?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| transport_error(e, timeout))?;
            Ok::<_, Error>(Response::new(status, headers, body.to_vec()))
        };

        match request.cancellation() {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(TransportError::Cancelled.into()),
                result = call => result,
            },
            None => call.await,
        }
    }
}

// Static headers may carry bearer tokens, so only the shape is printed.
impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base", &self.inner.base)
            .field("session", &self.inner.session)
            .field("headers", &"[REDACTED]")
            .field("timeout", &self.inner.timeout)
            .finish()
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    base: BaseUrl,
    headers: Vec<(String, String)>,
    timeout: Duration,
    danger_accept_invalid_certs: bool,
    auth_expired_marker: String,
    provider: Option<(Arc<dyn IdentityProvider>, Credentials)>,
    keycloak: Option<(Credentials, Url)>,
}

impl HttpClientBuilder {
    fn new(base: BaseUrl) -> Self {
        Self {
            base,
            headers: Vec::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            danger_accept_invalid_certs: false,
            auth_expired_marker: DEFAULT_AUTH_EXPIRED_MARKER.to_string(),
            provider: None,
            keycloak: None,
        }
    }

    /// Add a static header sent with every request.
    ///
    /// Overrides the default `Content-Type: application/json` when named so.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn bearer_token(self, token: &str) -> Self {
        self.header(AUTHORIZATION.as_str(), format!("Bearer {}", token))
    }

    /// Default timeout for every request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Skip TLS certificate verification.
    ///
    /// Off by default; turning it on logs a warning at build time.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.danger_accept_invalid_certs = accept;
        self
    }

    /// Body text that marks an expired session.
    pub fn auth_expired_marker(mut self, marker: impl Into<String>) -> Self {
        self.auth_expired_marker = marker.into();
        self
    }

    /// Log in through a Keycloak server with default realm and client.
    pub fn keycloak(mut self, credentials: Credentials, server: Url) -> Self {
        self.keycloak = Some((credentials, server));
        self
    }

    /// Log in through an arbitrary identity provider.
    pub fn identity_provider(
        mut self,
        provider: Arc<dyn IdentityProvider>,
        credentials: Credentials,
    ) -> Self {
        self.provider = Some((provider, credentials));
        self
    }

    /// Build the client, performing the login exchange when configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if login fails, or [`Error::InvalidInput`] for
    /// malformed headers.
    pub async fn build(self) -> Result<HttpClient> {
        if self.danger_accept_invalid_certs {
            warn!(base = %self.base, "TLS certificate verification is disabled");
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("stackcheck/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.danger_accept_invalid_certs)
            .build()
            .map_err(|e| TransportError::Other {
                message: e.to_string(),
            })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &self.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| InvalidInputError::Header {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            headers.insert(header_name, header_value(name, value)?);
        }

        let provider = match (self.provider, self.keycloak) {
            (Some(provider), _) => Some(provider),
            (None, Some((credentials, server))) => {
                let config = KeycloakConfig {
                    danger_accept_invalid_certs: self.danger_accept_invalid_certs,
                    timeout: self.timeout,
                    ..KeycloakConfig::default()
                };
                let provider: Arc<dyn IdentityProvider> =
                    Arc::new(KeycloakProvider::new(&server, config)?);
                Some((provider, credentials))
            }
            (None, None) => None,
        };

        let session = match provider {
            Some((provider, credentials)) => Some(AuthSession::login(provider, credentials).await?),
            None => None,
        };

        Ok(HttpClient {
            inner: Arc::new(ClientInner {
                client,
                base: self.base,
                headers,
                session,
                auth_expired_marker: self.auth_expired_marker,
                timeout: self.timeout,
            }),
        })
    }
}

fn with_body(request: Request, body: Option<String>) -> Request {
    match body {
        Some(body) => request.body(body),
        None => request,
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| {
        InvalidInputError::Header {
            name: name.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            duration_ms: timeout.as_millis() as u64,
        }
    } else if err.is_connect() {
        TransportError::Connection {
            message: err.to_string(),
        }
    } else if err.is_body() || err.is_decode() {
        TransportError::Decode {
            message: err.to_string(),
        }
    } else {
        TransportError::Other {
            message: err.to_string(),
        }
    }
}
