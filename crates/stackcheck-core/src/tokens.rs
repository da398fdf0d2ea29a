//! Session token types.

use std::fmt;

macro_rules! opaque_token {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        ///
        /// The value is opaque and never shown by `Debug`.
        #[derive(Clone, PartialEq, Eq)]
        pub struct $name(String);

        impl $name {
            pub fn new(token: impl Into<String>) -> Self {
                Self(token.into())
            }

            /// Raw value, for building the request that carries it.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&"[REDACTED]").finish()
            }
        }
    };
}

opaque_token!(
    /// Short-lived token attached to every authenticated request.
    AccessToken
);

opaque_token!(
    /// Token exchanged with the identity provider for a fresh token set.
    RefreshToken
);

/// The credential pair handed out by an identity provider.
///
/// A token set is replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: AccessToken,
    pub refresh_token: Option<RefreshToken>,
}

impl TokenSet {
    /// Create a token set from raw token strings.
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: AccessToken::new(access_token),
            refresh_token: refresh_token.map(RefreshToken::new),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_hides_value_in_debug() {
        let token = AccessToken::new("eyJhbGciOiJSUzI1NiJ9.payload");
        let debug = format!("{:?}", token);
        assert!(!debug.contains("eyJ"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn token_set_debug_redacts_both_tokens() {
        let tokens = TokenSet::new("access-value", Some("refresh-value".to_string()));
        let debug = format!("{:?}", tokens);
        assert!(!debug.contains("access-value"));
        assert!(!debug.contains("refresh-value"));
    }
}
