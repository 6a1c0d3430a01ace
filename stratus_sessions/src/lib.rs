//! Expiry-aware caching of cloud provider authentication sessions
//!
//! Cloud provider SDK clients authenticate once and then reuse the resulting
//! session token across many API calls. This library owns that lifecycle:
//! a login source fetches a session from the provider, a memoizing supplier
//! serves it to every concurrent caller while it is still fresh, and a shared
//! failure latch makes sure a credential the provider has rejected is never
//! retried for the remainder of the process.
//!
//! The supplier is deliberately generic: any derived mapping that depends on
//! the same credential (such as the organization directory returned at login)
//! can be memoized in its own [`ExpiringSupplier`] cell while sharing the
//! session's [`AuthFailureLatch`].
//!
//! # General Flow
//!
//! On application start-up, construct a login source from your provider
//! endpoint and credentials, then wrap it in an [`ExpiringSupplier`]. Every
//! part of the application that needs an authenticated session calls
//! [`get()`][ExpiringSupplier::get]; when the freshness window has elapsed or
//! the cached session has been invalidated, exactly one caller performs the
//! login on behalf of all waiters.
//!
//! ```no_run
//! use std::sync::Arc;
//! use stratus_sessions::{AuthFailureLatch, CredentialHeaders, ExpiringSupplier, RefreshConfig};
//! use stratus_sessions::sources::HttpLoginSource;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let source = HttpLoginSource::new(
//!     reqwest::Client::new(),
//!     url::Url::parse("https://cloud.example.com/v0.8/login")?,
//!     "acme@example.com".into(),
//!     "super-secret-key".into(),
//!     &CredentialHeaders::default(),
//! )?;
//!
//! let latch = Arc::new(AuthFailureLatch::new());
//! let sessions = ExpiringSupplier::new(source, RefreshConfig::default(), latch);
//!
//! let session = sessions.get().await?;
//! println!("{} orgs visible to this session", session.orgs().len());
//! # Ok(())
//! # }
//! ```
//!
//! When a later API call fails because the provider expired the session
//! lease, the transport layer (see the `stratus_reqwest` crate) calls
//! [`invalidate()`][ExpiringSupplier::invalidate] and replays the request;
//! the next `get()` performs a fresh login.
//!
//! # Features
//!
//! * `login` (default): provides [`sources::HttpLoginSource`], an HTTP login
//!   source built on [reqwest].

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod backoff;
mod braids;
mod headers;
mod latch;
mod session;
pub mod sources;
mod supplier;

pub use braids::*;
pub use headers::CredentialHeaders;
pub use latch::AuthFailureLatch;
pub use session::{OrgRef, Session};
pub use supplier::{ExpiringSupplier, RefreshConfig, SupplierError};
