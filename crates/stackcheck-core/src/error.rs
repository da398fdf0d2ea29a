//! Error types for stackcheck.
//!
//! The three terminal request failures are [`Error::Auth`] (the identity
//! provider exchange failed), [`Error::Http`] (a non-success response that is
//! not an expired session) and [`Error::ExhaustedRetries`] (every attempt
//! reported an expired session). The remaining variants cover transport,
//! payload, templating, input and configuration problems.

use std::fmt;
use thiserror::Error;

/// The unified error type for stackcheck operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Network transport errors (connection, timeout, cancellation).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Identity provider login or refresh failed.
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// A completed response with a non-success status.
    #[error("http error: {0}")]
    Http(#[from] HttpError),

    /// The session stayed expired on every attempt.
    #[error("cannot authenticate: session still expired after {attempts} attempts")]
    ExhaustedRetries { attempts: u32 },

    /// The service answered, but not with what the API promises.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Dashboard panel or templating errors.
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// Input validation errors (URL, header, query format).
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInputError),

    /// Missing or malformed settings.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Returns the HTTP status when this is an [`Error::Http`].
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http(err) => Some(err.status),
            _ => None,
        }
    }

    /// Returns true if the error is an HTTP 404.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network connection failed.
    #[error("connection failed: {message}")]
    Connection { message: String },

    /// Request timed out.
    #[error("request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// Response body could not be read or decoded.
    #[error("failed to decode response: {message}")]
    Decode { message: String },

    /// Generic HTTP client error.
    #[error("HTTP client error: {message}")]
    Other { message: String },
}

/// Identity provider errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The password grant was rejected or could not be performed.
    #[error("login failed: {reason}")]
    LoginFailed { reason: String },

    /// The refresh grant was rejected or could not be performed.
    #[error("token refresh failed: {reason}")]
    RefreshFailed { reason: String },
}

/// A completed HTTP response with a non-success status.
#[derive(Debug)]
pub struct HttpError {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body, for diagnostics.
    pub body: String,
}

impl HttpError {
    /// Create a new HTTP error.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}", self.status)?;
        if !self.body.is_empty() {
            write!(f, ": {}", self.body)?;
        }
        Ok(())
    }
}

impl std::error::Error for HttpError {}

/// Unexpected payloads from an otherwise successful response.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The service reported a failed query.
    #[error("{service} query failed: {message}")]
    QueryFailed { service: String, message: String },

    /// A field the API guarantees was missing or had the wrong shape.
    #[error("unexpected {service} response: {message}")]
    UnexpectedPayload { service: String, message: String },

    /// A polled condition did not hold before the deadline.
    #[error("timed out after {waited_secs}s: {message}")]
    WaitTimedOut { waited_secs: u64, message: String },
}

/// Dashboard panel and templating errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A panel target has neither a raw query nor an expression.
    #[error("expression/query for the panel '{panel}' at the ref '{ref_id}' is empty")]
    EmptyTarget { panel: String, ref_id: String },

    /// Templating variables reference each other in a loop.
    #[error("templating variables form a cycle through '{variable}'")]
    Cycle { variable: String },

    /// A query variable uses a function the expander does not know.
    #[error("unsupported templating query '{query}'")]
    UnsupportedQuery { query: String },

    /// A variable regex failed to compile.
    #[error("invalid regex '{regex}' for variable '{variable}': {reason}")]
    InvalidRegex {
        variable: String,
        regex: String,
        reason: String,
    },

    /// The dashboard JSON is missing a required field.
    #[error("malformed dashboard: {message}")]
    MalformedDashboard { message: String },
}

/// Input validation errors.
#[derive(Debug, Error)]
pub enum InvalidInputError {
    /// Invalid base URL.
    #[error("invalid URL '{value}': {reason}")]
    Url { value: String, reason: String },

    /// Path could not be joined onto the base URL.
    #[error("cannot join '{path}' onto '{base}': {reason}")]
    Path {
        base: String,
        path: String,
        reason: String,
    },

    /// Invalid header name or value.
    #[error("invalid header '{name}': {reason}")]
    Header { name: String, reason: String },

    /// Generic invalid input.
    #[error("invalid input: {message}")]
    Other { message: String },
}

/// Settings errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("{name} is not set")]
    Missing { name: String },

    /// An environment variable could not be parsed.
    #[error("invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}
