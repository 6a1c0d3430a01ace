//! Middleware to authenticate outgoing requests with a cached provider session
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`SessionTokenMiddleware`] in the middleware stack to attach
//! the cached session token to each outbound request, and [`RetryOnRenew`]
//! to transparently renew the session and replay a request the provider
//! refused because its lease expired.
//!
//! If a request already carries a value under the token header by the time
//! the middleware executes, the existing value is left in place, allowing
//! overrides to be specified as required.
//!
//! [`RetryOnRenew`] must sit *outside* [`SessionTokenMiddleware`] in the
//! stack so that a replayed request passes through token attachment again
//! and picks up the freshly fetched session:
//!
//! ```no_run
//! use std::sync::Arc;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//! use stratus_reqwest::{RetryOnRenew, SessionTokenMiddleware};
//! use stratus_sessions::{
//!     sources::ConstSessionSource, AuthFailureLatch, CredentialHeaders, ExpiringSupplier,
//!     RefreshConfig, Session, SessionToken,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::new(SessionToken::from("sess-1"), Default::default());
//! let sessions = ExpiringSupplier::new(
//!     ConstSessionSource::new(session),
//!     RefreshConfig::default(),
//!     Arc::new(AuthFailureLatch::new()),
//! );
//!
//! let headers = CredentialHeaders::default();
//! let client = ClientBuilder::new(Client::default())
//!     .with(RetryOnRenew::new(sessions.clone()))
//!     .with(SessionTokenMiddleware::new(sessions, &headers)?)
//!     .build();
//! # Ok(())
//! # }
//! ```
//!
//! By default the token is only attached when the request travels over
//! HTTPS; provide a custom predicate with
//! [`with_predicate()`][SessionTokenMiddleware::with_predicate] to change
//! that.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use aliri_clock::{Clock, System};
use bytes::{BufMut, BytesMut};
use predicates::{prelude::*, reflection};
use reqwest::{
    header::{HeaderName, HeaderValue, InvalidHeaderName},
    Request, Response,
};
use reqwest_middleware::{Error, Middleware, Next, Result};
use stratus_sessions::{sources::AsyncSupplier, CredentialHeaders, ExpiringSupplier, Session};

mod retry;

pub use retry::{RetryOnRenew, DEFAULT_LEASE_EXPIRY_MARKER};

/// A middleware that injects the cached session token into outgoing requests
#[derive(Clone)]
pub struct SessionTokenMiddleware<S: AsyncSupplier<Value = Session>, C = System, P = HttpsOnly> {
    sessions: ExpiringSupplier<S, C>,
    token_header: HeaderName,
    predicate: P,
}

impl<S: AsyncSupplier<Value = Session>, C> SessionTokenMiddleware<S, C, HttpsOnly> {
    /// Constructs a new middleware from a shared session supplier
    ///
    /// The token is attached under the token header configured in `headers`.
    /// Fails if that name is not a valid header name.
    ///
    /// By default, this middleware only sends the token if the request is
    /// being sent via HTTPS. To change this behavior, provide a custom
    /// predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(
        sessions: ExpiringSupplier<S, C>,
        headers: &CredentialHeaders,
    ) -> std::result::Result<Self, InvalidHeaderName> {
        Ok(Self {
            sessions,
            token_header: HeaderName::try_from(headers.token())?,
            predicate: HttpsOnly,
        })
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> SessionTokenMiddleware<S, C, P> {
        SessionTokenMiddleware {
            sessions: self.sessions,
            token_header: self.token_header,
            predicate,
        }
    }
}

impl<S: AsyncSupplier<Value = Session>, C: Clock, P> SessionTokenMiddleware<S, C, P> {
    async fn session_header_value(&self) -> Result<HeaderValue> {
        let session = self.sessions.get().await.map_err(Error::middleware)?;

        tracing::trace!(
            session.issued = session.issued().0,
            session.orgs = session.orgs().len(),
            "obtained session token"
        );

        let token = session.token().as_str();
        let mut header_value = BytesMut::with_capacity(token.len());
        header_value.put_slice(token.as_bytes());
        let mut value =
            HeaderValue::from_maybe_shared(header_value.freeze()).map_err(Error::middleware)?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl<S: AsyncSupplier<Value = Session>, C, P: fmt::Debug> fmt::Debug
    for SessionTokenMiddleware<S, C, P>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokenMiddleware")
            .field("token_header", &self.token_header)
            .field("predicate", &self.predicate)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<S, C, P> Middleware for SessionTokenMiddleware<S, C, P>
where
    S: AsyncSupplier<Value = Session> + 'static,
    C: Clock + Send + Sync + 'static,
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) && !req.headers().contains_key(&self.token_header) {
            let value = self.session_header_value().await?;
            req.headers_mut().insert(self.token_header.clone(), value);
        }

        next.run(req, extensions).await
    }
}

/// Only attach the session token if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "scheme",
                    req.url().scheme().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}
