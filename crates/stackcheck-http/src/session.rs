//! Identity provider session held by an authenticated client.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use stackcheck_core::{AccessToken, Credentials, IdentityProvider, Result, TokenSet};

/// Cookie carrying the access token on every authenticated request.
pub const SESSION_COOKIE: &str = "kc-access";

/// The token set obtained from an identity provider, refreshed in place.
pub(crate) struct AuthSession {
    provider: Arc<dyn IdentityProvider>,
    credentials: Credentials,
    tokens: RwLock<TokenSet>,
}

impl AuthSession {
    /// Log in and hold the resulting tokens.
    #[instrument(skip_all, fields(username = %credentials.username()))]
    pub(crate) async fn login(
        provider: Arc<dyn IdentityProvider>,
        credentials: Credentials,
    ) -> Result<Self> {
        info!("Logging in to identity provider");

        let tokens = provider.login(&credentials).await?;

        debug!("Session created successfully");
        Ok(Self {
            provider,
            credentials,
            tokens: RwLock::new(tokens),
        })
    }

    /// Replace the token set with a fresh one.
    ///
    /// Uses the refresh grant when a refresh token is held, otherwise logs in
    /// again with the stored credentials.
    #[instrument(skip(self), fields(username = %self.credentials.username()))]
    pub(crate) async fn refresh(&self) -> Result<()> {
        info!("Refreshing session");

        let refresh_token = self.tokens.read().await.refresh_token.clone();

        let fresh = match refresh_token {
            Some(token) => self.provider.refresh(&token).await?,
            None => self.provider.login(&self.credentials).await?,
        };

        *self.tokens.write().await = fresh;

        debug!("Session refreshed successfully");
        Ok(())
    }

    /// The `Cookie` header value for the current access token.
    pub(crate) async fn cookie(&self) -> String {
        let tokens = self.tokens.read().await;
        format!("{}={}", SESSION_COOKIE, tokens.access_token.as_str())
    }

    pub(crate) async fn access_token(&self) -> AccessToken {
        self.tokens.read().await.access_token.clone()
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("provider", &self.provider)
            .field("credentials", &self.credentials)
            .field("tokens", &"[REDACTED]")
            .finish()
    }
}
