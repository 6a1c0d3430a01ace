//! Retry handling for expired provider session leases
//!
//! Some providers answer a request made with a session whose lease has
//! lapsed with `401` and a recognizable marker in the error body. The
//! middleware here inspects such failures, invalidates the shared session
//! cell so the next fetch performs a fresh login, and replays the original
//! request. A `401` from the login exchange itself is terminal and is never
//! replayed.

use aliri_clock::{Clock, System};
use reqwest::{header::HeaderMap, Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next, Result};
use stratus_sessions::{sources::AsyncSupplier, CredentialHeaders, ExpiringSupplier, Session};
use std::fmt;

/// The marker substring identifying a lease-expiry error body
pub const DEFAULT_LEASE_EXPIRY_MARKER: &str = "lease renew";

/// A middleware that renews the session and replays requests refused
/// because the session lease expired
///
/// Only `401` responses are ever considered. The decision itself is exposed
/// as [`should_retry()`][Self::should_retry]; the middleware supplies the
/// surrounding replay loop, bounded by the configured renewal count.
pub struct RetryOnRenew<S: AsyncSupplier<Value = Session>, C = System> {
    sessions: ExpiringSupplier<S, C>,
    headers: CredentialHeaders,
    marker: String,
    max_renewals: u32,
}

impl<S: AsyncSupplier<Value = Session>, C> RetryOnRenew<S, C> {
    /// Constructs the middleware over the shared session supplier
    ///
    /// Uses the default credential header names, the default lease-expiry
    /// marker, and a single renewal per request.
    pub fn new(sessions: ExpiringSupplier<S, C>) -> Self {
        Self {
            sessions,
            headers: CredentialHeaders::default(),
            marker: String::from(DEFAULT_LEASE_EXPIRY_MARKER),
            max_renewals: 1,
        }
    }

    /// Recognize login exchanges and session tokens by these header names
    pub fn with_credential_headers(mut self, headers: CredentialHeaders) -> Self {
        self.headers = headers;
        self
    }

    /// Recognize lease expiry by this marker substring in the error body
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Replay a request at most this many times
    pub fn with_max_renewals(mut self, max_renewals: u32) -> Self {
        self.max_renewals = max_renewals;
        self
    }

    fn is_login_exchange(&self, request_headers: &HeaderMap) -> bool {
        request_headers.contains_key(self.headers.user())
            && request_headers.contains_key(self.headers.key())
            && !request_headers.contains_key(self.headers.token())
    }
}

impl<S: AsyncSupplier<Value = Session>, C: Clock> RetryOnRenew<S, C> {
    /// Decides whether a failed exchange should be replayed after renewing
    /// the session
    ///
    /// Returns the verdict together with the response, rebuilt if its
    /// payload had to be consumed for inspection. Exactly one of the
    /// following holds on return:
    ///
    /// * the status was not `401`, or the request was the login exchange
    ///   itself: verdict is `false` and the response is untouched;
    /// * the `401` body contains the lease-expiry marker: the session cell
    ///   has been invalidated and the verdict is `true`;
    /// * otherwise the verdict is `false` and the cache is left alone.
    ///
    /// An unreadable body is logged and treated as carrying no marker.
    pub async fn should_retry(
        &self,
        request_headers: &HeaderMap,
        response: Response,
    ) -> (bool, Response) {
        if response.status() != StatusCode::UNAUTHORIZED {
            return (false, response);
        }

        if self.is_login_exchange(request_headers) {
            tracing::debug!("401 from the login exchange itself; not retrying");
            return (false, response);
        }

        let (content, response) = read_error_payload(response).await;
        if content
            .as_deref()
            .is_some_and(|content| content.contains(&self.marker))
        {
            tracing::debug!("session lease expired; invalidating cached session");
            self.sessions.invalidate();
            (true, response)
        } else {
            (false, response)
        }
    }
}

/// Fully consumes the error payload, handing back its text and an
/// equivalent response
///
/// The payload must not leak unread into the connection pool, so it is
/// drained on every path; a read failure is logged and reported as an
/// absent body.
async fn read_error_payload(response: Response) -> (Option<String>, Response) {
    let status = response.status();
    let version = response.version();
    let headers = response.headers().clone();
    let extensions = response.extensions().clone();

    let content = match response.text().await {
        Ok(text) => Some(text),
        Err(error) => {
            let error: &dyn std::error::Error = &error;
            tracing::warn!(
                error,
                "error reading error payload from response; treating as empty"
            );
            None
        }
    };

    let mut rebuilt = http::Response::new(content.clone().unwrap_or_default());
    *rebuilt.status_mut() = status;
    *rebuilt.version_mut() = version;
    *rebuilt.headers_mut() = headers;
    *rebuilt.extensions_mut() = extensions;

    (content, rebuilt.into())
}

impl<S: AsyncSupplier<Value = Session>, C> fmt::Debug for RetryOnRenew<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOnRenew")
            .field("headers", &self.headers)
            .field("marker", &self.marker)
            .field("max_renewals", &self.max_renewals)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<S, C> Middleware for RetryOnRenew<S, C>
where
    S: AsyncSupplier<Value = Session> + 'static,
    C: Clock + Send + Sync + 'static,
{
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let mut renewals = 0;
        let mut request = req;

        loop {
            // A request with a streaming body cannot be cloned; such a
            // request is sent once and never replayed.
            let replay = if renewals < self.max_renewals {
                request.try_clone()
            } else {
                None
            };
            let request_headers = request.headers().clone();

            let response = next.clone().run(request, extensions).await?;

            let Some(replay) = replay else {
                return Ok(response);
            };

            let (retry, response) = self.should_retry(&request_headers, response).await;
            if !retry {
                return Ok(response);
            }

            renewals += 1;
            tracing::debug!(renewals, "replaying request with a renewed session");
            request = replay;
        }
    }
}
