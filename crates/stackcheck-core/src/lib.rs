//! stackcheck-core - Core types and traits for the stackcheck harness.

pub mod config;
pub mod credentials;
pub mod error;
pub mod tokens;
pub mod traits;
pub mod types;

pub use config::Settings;
pub use credentials::Credentials;
pub use error::Error;
pub use tokens::{AccessToken, RefreshToken, TokenSet};
pub use traits::{IdentityProvider, VariableSource};
pub use types::BaseUrl;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;
