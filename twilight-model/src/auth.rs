//! Authentication scheme and token pairing used on the `Authorization` header.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Scheme under which a token authenticates a request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum AuthScheme {
    /// Bot token, the common case for gateway and REST access.
    Bot,
    /// Bearer token, used for OAuth2 flows.
    Bearer,
}

impl AuthScheme {
    /// The string Discord expects as the scheme prefix of the header value.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bot => "Bot",
            Self::Bearer => "Bearer",
        }
    }
}

impl Display for AuthScheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Pairing of an [`AuthScheme`] and a token, rendered as an `Authorization`
/// header value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Auth {
    scheme: AuthScheme,
    token: String,
}

impl Auth {
    /// Create a new bot-scheme credential.
    pub fn bot(token: impl Into<String>) -> Self {
        Self {
            scheme: AuthScheme::Bot,
            token: token.into(),
        }
    }

    /// Create a new bearer-scheme credential.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            scheme: AuthScheme::Bearer,
            token: token.into(),
        }
    }

    /// The authentication scheme.
    pub const fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    /// The raw token, without the scheme prefix.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The full `Authorization` header value: `"{scheme} {token}"`.
    pub fn header(&self) -> String {
        format!("{} {}", self.scheme, self.token)
    }
}

impl Display for Auth {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.header())
    }
}

#[cfg(test)]
mod tests {
    use super::{Auth, AuthScheme};
    use static_assertions::assert_impl_all;

    assert_impl_all!(Auth: Clone, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(AuthScheme: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);

    #[test]
    fn header_format() {
        let auth = Auth::bot("abc123");
        assert_eq!("Bot abc123", auth.header());

        let auth = Auth::bearer("xyz789");
        assert_eq!("Bearer xyz789", auth.header());
    }

    #[test]
    fn scheme_name() {
        assert_eq!("Bot", AuthScheme::Bot.name());
        assert_eq!("Bearer", AuthScheme::Bearer.name());
    }
}
