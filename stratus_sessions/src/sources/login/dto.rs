//! DTOs for the normalized provider login response

use serde::{Deserialize, Serialize};
use url::Url;

/// The normalized login response body
#[derive(Debug, Deserialize, Serialize)]
pub struct LoginResponse {
    /// The organizations visible to the authenticated identity
    #[serde(default)]
    pub orgs: Vec<OrgEntry>,
}

/// A single organization entry in the login response
#[derive(Debug, Deserialize, Serialize)]
pub struct OrgEntry {
    /// The organization's name
    pub name: String,
    /// The endpoint at which the organization can be addressed
    pub href: Url,
}
