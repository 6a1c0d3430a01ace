/// Header names used to carry credentials to the provider
///
/// The login source sends the username and key under these names, and the
/// issued session token travels under the token name on subsequent requests.
/// The retry layer uses the same configuration in reverse to recognize a
/// login exchange: a request bearing both the user and key headers but no
/// token header is the initial authentication call and must never be
/// replayed after a `401`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialHeaders {
    user: String,
    key: String,
    token: String,
}

impl Default for CredentialHeaders {
    /// The OpenStack-style header names: `X-Auth-User`, `X-Auth-Key`,
    /// and `X-Auth-Token`
    fn default() -> Self {
        Self {
            user: String::from("x-auth-user"),
            key: String::from("x-auth-key"),
            token: String::from("x-auth-token"),
        }
    }
}

impl CredentialHeaders {
    /// Constructs a custom set of credential header names
    ///
    /// Names are normalized to lowercase, as header lookups are
    /// case-insensitive.
    pub fn new(
        user: impl Into<String>,
        key: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into().to_ascii_lowercase(),
            key: key.into().to_ascii_lowercase(),
            token: token.into().to_ascii_lowercase(),
        }
    }

    /// The header carrying the login username
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The header carrying the login key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The header carrying the issued session token
    pub fn token(&self) -> &str {
        &self.token
    }
}
