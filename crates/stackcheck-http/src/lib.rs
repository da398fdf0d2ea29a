//! stackcheck-http - Authenticated HTTP client for stackcheck.
//!
//! [`HttpClient`] performs calls against a fixed base URL, attaching an
//! identity provider session cookie when configured and refreshing it
//! transparently when a response reports that the session expired.

mod client;
mod keycloak;
mod request;
mod session;

pub use client::{DEFAULT_AUTH_EXPIRED_MARKER, HttpClient, HttpClientBuilder, MAX_ATTEMPTS};
pub use keycloak::{DEFAULT_CLIENT_ID, DEFAULT_REALM, KeycloakConfig, KeycloakProvider};
pub use request::{Request, Response};
pub use reqwest::Method;
pub use session::SESSION_COOKIE;
pub use tokio_util::sync::CancellationToken;
