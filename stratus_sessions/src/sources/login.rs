//! A session source that performs the provider login exchange
//!
//! The login call presents the username and key under the configured
//! credential headers. The provider answers with the session token in the
//! token header and a normalized body naming the organizations visible to
//! the authenticated identity.

use async_trait::async_trait;
use reqwest::{
    header::{HeaderName, HeaderValue, InvalidHeaderName, InvalidHeaderValue},
    StatusCode,
};
use thiserror::Error;
use url::Url;

use super::{AsyncSupplier, SourceError};
use crate::{
    headers::CredentialHeaders,
    session::{OrgRef, Session},
    ApiKey, SessionToken, Username,
};

pub mod dto;

/// An error while attempting to establish a session with the provider
#[derive(Debug, Error)]
pub enum LoginError {
    /// The provider rejected the supplied credentials
    #[error("provider rejected the supplied credentials ({status})")]
    Rejected {
        /// The status the provider answered with
        status: StatusCode,
        /// The body of the rejection
        body: String,
    },
    /// The provider answered the login with a non-auth error
    #[error("login failed with a provider error ({status})")]
    Provider {
        /// The status the provider answered with
        status: StatusCode,
        /// The body of the error
        body: String,
    },
    /// Unable to send the login request
    #[error("error sending login request to provider")]
    RequestSend(#[source] reqwest::Error),
    /// Unable to read the login response
    #[error("error reading login response body")]
    BodyRead(#[source] reqwest::Error),
    /// The success response carried no session token header
    #[error("login response did not include a session token header `{0}`")]
    MissingToken(String),
    /// Unable to deserialize the login response body
    #[error("error deserializing login response from provider")]
    Malformed(#[from] serde_json::Error),
    /// A credential contained bytes that cannot travel in a header
    #[error("credential is not a valid header value")]
    InvalidCredential(#[from] InvalidHeaderValue),
}

impl SourceError for LoginError {
    fn is_authorization(&self) -> bool {
        matches!(self, LoginError::Rejected { .. })
    }
}

/// A session source that logs in against a provider endpoint
#[derive(Debug)]
pub struct HttpLoginSource {
    client: reqwest::Client,
    login_url: Url,
    username: Username,
    key: ApiKey,
    user_header: HeaderName,
    key_header: HeaderName,
    token_header: HeaderName,
}

impl HttpLoginSource {
    /// Constructs a new login source
    ///
    /// Fails if any of the configured credential header names is not a
    /// valid header name.
    pub fn new(
        client: reqwest::Client,
        login_url: Url,
        username: Username,
        key: ApiKey,
        headers: &CredentialHeaders,
    ) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            client,
            login_url,
            username,
            key,
            user_header: HeaderName::try_from(headers.user())?,
            key_header: HeaderName::try_from(headers.key())?,
            token_header: HeaderName::try_from(headers.token())?,
        })
    }

    #[tracing::instrument(
        err,
        skip(self),
        fields(login_url = %self.login_url, username = %self.username),
    )]
    async fn login(&self) -> Result<Session, LoginError> {
        tracing::trace!("requesting session from provider");

        let mut key_value = HeaderValue::from_str(self.key.as_str())?;
        key_value.set_sensitive(true);

        let resp = self
            .client
            .post(self.login_url.clone())
            .header(
                self.user_header.clone(),
                HeaderValue::from_str(self.username.as_str())?,
            )
            .header(self.key_header.clone(), key_value)
            .send()
            .await
            .map_err(LoginError::RequestSend)?;

        let status = resp.status();
        tracing::debug!(
            response.status = status.as_u16(),
            "received login response from provider"
        );

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = resp.text().await.map_err(LoginError::BodyRead)?;
            return Err(LoginError::Rejected { status, body });
        }
        if !status.is_success() {
            let body = resp.text().await.map_err(LoginError::BodyRead)?;
            return Err(LoginError::Provider { status, body });
        }

        let token = resp
            .headers()
            .get(&self.token_header)
            .and_then(|value| value.to_str().ok())
            .map(SessionToken::from)
            .ok_or_else(|| LoginError::MissingToken(self.token_header.as_str().to_owned()))?;

        let body = resp.bytes().await.map_err(LoginError::BodyRead)?;
        let resp: dto::LoginResponse = serde_json::from_slice(&body)?;

        let orgs = resp
            .orgs
            .into_iter()
            .map(|org| {
                (
                    org.name.clone(),
                    OrgRef {
                        name: org.name,
                        href: org.href,
                    },
                )
            })
            .collect();

        let session = Session::new(token, orgs);
        tracing::info!(orgs = session.orgs().len(), "established provider session");
        Ok(session)
    }
}

#[async_trait]
impl AsyncSupplier for HttpLoginSource {
    type Value = Session;
    type Error = LoginError;

    async fn fetch(&mut self) -> Result<Session, LoginError> {
        self.login().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rejections_count_as_authorization_failures() {
        let rejected = LoginError::Rejected {
            status: StatusCode::UNAUTHORIZED,
            body: String::new(),
        };
        let provider = LoginError::Provider {
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        let missing = LoginError::MissingToken(String::from("x-auth-token"));

        assert!(rejected.is_authorization());
        assert!(!provider.is_authorization());
        assert!(!missing.is_authorization());
    }

    #[test]
    fn login_responses_parse_without_optional_fields() {
        let parsed: dto::LoginResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(parsed.orgs.is_empty());

        let parsed: dto::LoginResponse = serde_json::from_str(
            r#"{"orgs":[{"name":"acme","href":"https://cloud.example.com/org/acme"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.orgs.len(), 1);
        assert_eq!(parsed.orgs[0].name, "acme");
    }
}
