use std::collections::BTreeMap;

use aliri_clock::{Clock, System, UnixTime};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{SessionToken, SessionTokenRef};

/// A reference handle to an organization visible to a session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgRef {
    /// The organization's name
    pub name: String,
    /// The endpoint at which the organization can be addressed
    pub href: Url,
}

/// An authenticated provider session
///
/// Produced by a login exchange; holds the opaque session token and the
/// directory of organizations visible to the authenticated identity. A
/// session is immutable once fetched: renewal always produces a distinct
/// value, and the old one is simply discarded.
#[derive(Debug, Serialize, Deserialize)]
pub struct Session {
    token: Box<SessionTokenRef>,
    orgs: BTreeMap<String, OrgRef>,
    issued: UnixTime,
}

impl Session {
    /// Constructs a session issued now
    pub fn new(token: SessionToken, orgs: BTreeMap<String, OrgRef>) -> Self {
        Self::issued_at(token, orgs, System.now())
    }

    /// Constructs a session with an explicit issue time
    pub fn issued_at(
        token: SessionToken,
        orgs: BTreeMap<String, OrgRef>,
        issued: UnixTime,
    ) -> Self {
        Self {
            token: token.into_boxed_ref(),
            orgs,
            issued,
        }
    }

    pub(crate) fn clone_it(&self) -> Self {
        Self {
            token: self.token.to_owned().into_boxed_ref(),
            orgs: self.orgs.clone(),
            issued: self.issued,
        }
    }

    /// The opaque session token
    #[inline]
    pub fn token(&self) -> &SessionTokenRef {
        &self.token
    }

    /// The directory of organizations visible to this session, by name
    #[inline]
    pub fn orgs(&self) -> &BTreeMap<String, OrgRef> {
        &self.orgs
    }

    /// Looks up a single organization by name
    #[inline]
    pub fn org(&self, name: &str) -> Option<&OrgRef> {
        self.orgs.get(name)
    }

    /// The time at which this session was issued
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }
}
