//! Identity provider trait.

use async_trait::async_trait;

use crate::{Credentials, RefreshToken, Result, TokenSet};

/// An external service that exchanges credentials for session tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync + std::fmt::Debug {
    /// Perform the initial login exchange.
    async fn login(&self, credentials: &Credentials) -> Result<TokenSet>;

    /// Exchange a refresh token for a fresh token set.
    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenSet>;
}
