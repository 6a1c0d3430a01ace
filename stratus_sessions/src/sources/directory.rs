//! Derives the organization directory from the cached session
//!
//! The directory is memoized in its own [`ExpiringSupplier`] cell so callers
//! that only need the org mapping do not hold the session cell's refresh
//! path. Both cells should share one [`AuthFailureLatch`]: once the
//! credential is rejected, neither mapping refreshes again.
//!
//! [`AuthFailureLatch`]: crate::AuthFailureLatch

use std::collections::BTreeMap;

use aliri_clock::{Clock, System};
use async_trait::async_trait;
use thiserror::Error;

use super::{AsyncSupplier, SourceError};
use crate::{
    session::{OrgRef, Session},
    supplier::{ExpiringSupplier, SupplierError},
};

/// Failure to derive the organization directory
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No session could be obtained to derive the directory from
    #[error("unable to obtain a session for the directory")]
    Session(#[from] SupplierError),
}

impl SourceError for DirectoryError {
    fn is_authorization(&self) -> bool {
        matches!(self, DirectoryError::Session(SupplierError::Authorization))
    }
}

/// Supplies the org-name to org-reference mapping for the current session
#[derive(Debug)]
pub struct OrgDirectorySource<S: AsyncSupplier<Value = Session>, C = System> {
    sessions: ExpiringSupplier<S, C>,
}

impl<S: AsyncSupplier<Value = Session>, C> OrgDirectorySource<S, C> {
    /// Constructs a directory source over the shared session supplier
    pub fn new(sessions: ExpiringSupplier<S, C>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl<S, C> AsyncSupplier for OrgDirectorySource<S, C>
where
    S: AsyncSupplier<Value = Session>,
    C: Clock + Send + Sync,
{
    type Value = BTreeMap<String, OrgRef>;
    type Error = DirectoryError;

    async fn fetch(&mut self) -> Result<Self::Value, Self::Error> {
        let session = self.sessions.get().await?;
        Ok(session.orgs().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sources::ConstSessionSource, AuthFailureLatch, RefreshConfig, SessionToken,
    };
    use std::sync::Arc;
    use url::Url;

    fn session() -> Session {
        let mut orgs = BTreeMap::new();
        orgs.insert(
            String::from("acme"),
            OrgRef {
                name: String::from("acme"),
                href: Url::parse("https://cloud.example.com/org/acme").unwrap(),
            },
        );
        Session::new(SessionToken::from("tok-1"), orgs)
    }

    #[tokio::test]
    async fn directory_reflects_the_cached_session() {
        let latch = Arc::new(AuthFailureLatch::new());
        let sessions = ExpiringSupplier::new(
            ConstSessionSource::new(session()),
            RefreshConfig::default(),
            Arc::clone(&latch),
        );
        let directory = ExpiringSupplier::new(
            OrgDirectorySource::new(sessions),
            RefreshConfig::default(),
            latch,
        );

        let orgs = directory.get().await.expect("directory");
        assert_eq!(orgs.len(), 1);
        assert_eq!(
            orgs["acme"].href.as_str(),
            "https://cloud.example.com/org/acme"
        );
    }

    #[tokio::test]
    async fn a_latched_session_cell_is_an_authorization_failure_here_too() {
        let latch = Arc::new(AuthFailureLatch::new());
        let sessions = ExpiringSupplier::new(
            ConstSessionSource::new(session()),
            RefreshConfig::default(),
            Arc::clone(&latch),
        );
        let directory = ExpiringSupplier::new(
            OrgDirectorySource::new(sessions),
            RefreshConfig::default(),
            Arc::clone(&latch),
        );

        latch.try_set();
        assert_eq!(
            directory.get().await,
            Err(SupplierError::Authorization)
        );
    }
}
