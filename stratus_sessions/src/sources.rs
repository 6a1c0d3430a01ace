//! Session and directory sources
//!
//! A source is the slow operation behind a memoized cell: the provider login
//! call for sessions, or a derivation over the cached session for mappings
//! such as the organization directory.

use async_trait::async_trait;
use std::error;

pub mod constant;
pub mod directory;
#[cfg(feature = "login")]
pub mod login;

pub use constant::ConstSessionSource;
pub use directory::OrgDirectorySource;
#[cfg(feature = "login")]
pub use login::HttpLoginSource;

/// An asynchronous source for a cached value
///
/// Implementors perform the actual (usually network-bound) fetch. The
/// [`ExpiringSupplier`][crate::ExpiringSupplier] guarantees that at most one
/// `fetch` per cell is in flight at a time.
#[async_trait]
pub trait AsyncSupplier: Send + Sync {
    /// The value produced by this source
    type Value: Send + Sync + 'static;

    /// The error type returned when a fetch fails
    type Error: SourceError;

    /// Fetches a fresh value
    async fn fetch(&mut self) -> Result<Self::Value, Self::Error>;
}

/// Classifies source failures for the memoization layer
///
/// An authorization failure trips the shared
/// [`AuthFailureLatch`][crate::AuthFailureLatch] and permanently disables
/// refreshes for every cell guarding the credential; anything else is
/// treated as transient and retried until the caller's deadline elapses.
pub trait SourceError: error::Error + Send + Sync + 'static {
    /// Whether this failure means the credential itself was rejected
    fn is_authorization(&self) -> bool;
}
