//! Identity and membership providers.
//!
//! Thin capability traits over the identity service (tokens, users, scope groups)
//! and the org/space membership service. Adapters map an upstream 404 to
//! `ProviderError::NotFound` and any other failure to `ProviderError::ServiceDown`.

pub mod cloud_controller;
pub mod in_memory;
pub mod uaa;

pub use cloud_controller::CloudControllerClient;
pub use in_memory::InMemoryDirectory;
pub use uaa::UaaClient;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("service unavailable: {0}")]
    ServiceDown(String),
}

impl ProviderError {
    pub(crate) fn from_status(status: reqwest::StatusCode, what: &str) -> Self {
        if status == reqwest::StatusCode::NOT_FOUND {
            ProviderError::NotFound(what.to_string())
        } else {
            ProviderError::ServiceDown(format!("{what}: upstream returned {status}"))
        }
    }

    pub(crate) fn transport(err: reqwest::Error, what: &str) -> Self {
        ProviderError::ServiceDown(format!("{what}: {err}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub guid: String,
    pub name: String,
    pub organization_guid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub guid: String,
    pub name: String,
}

/// A user record from the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUser {
    pub guid: String,
    pub email: Option<String>,
}

/// Organization roles that can be targeted by an org-role dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrgRole {
    OrgManager,
    OrgAuditor,
    BillingManager,
}

impl OrgRole {
    pub const ALL: [OrgRole; 3] = [OrgRole::OrgManager, OrgRole::OrgAuditor, OrgRole::BillingManager];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::OrgManager => "OrgManager",
            OrgRole::OrgAuditor => "OrgAuditor",
            OrgRole::BillingManager => "BillingManager",
        }
    }

    /// Membership collection name in the v2 org API.
    pub(crate) fn collection(&self) -> &'static str {
        match self {
            OrgRole::OrgManager => "managers",
            OrgRole::OrgAuditor => "auditors",
            OrgRole::BillingManager => "billing_managers",
        }
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrgRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrgRole::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown organization role {s:?}"))
    }
}

/// Issues service tokens for upstream calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, ProviderError>;
}

/// User and scope-group lookups.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Users for the given ids. Unknown ids are omitted; order is not guaranteed.
    async fn users_by_ids(
        &self,
        token: &str,
        ids: &[String],
    ) -> Result<Vec<IdentityUser>, ProviderError>;

    async fn all_user_guids(&self, token: &str) -> Result<Vec<String>, ProviderError>;

    /// Members of the group named after `scope`.
    async fn user_guids_with_scope(
        &self,
        token: &str,
        scope: &str,
    ) -> Result<Vec<String>, ProviderError>;
}

#[async_trait]
pub trait SpaceMembershipProvider: Send + Sync {
    async fn load_space(&self, token: &str, guid: &str) -> Result<Space, ProviderError>;

    async fn user_guids_for_space(&self, token: &str, guid: &str)
        -> Result<Vec<String>, ProviderError>;
}

#[async_trait]
pub trait OrgMembershipProvider: Send + Sync {
    async fn load_organization(&self, token: &str, guid: &str)
        -> Result<Organization, ProviderError>;

    /// All members, or only those holding `role`.
    async fn user_guids_for_organization(
        &self,
        token: &str,
        guid: &str,
        role: Option<OrgRole>,
    ) -> Result<Vec<String>, ProviderError>;
}

#[async_trait]
impl<T: TokenProvider + ?Sized> TokenProvider for Arc<T> {
    async fn token(&self) -> Result<String, ProviderError> {
        (**self).token().await
    }
}

#[async_trait]
impl<T: IdentityProvider + ?Sized> IdentityProvider for Arc<T> {
    async fn users_by_ids(
        &self,
        token: &str,
        ids: &[String],
    ) -> Result<Vec<IdentityUser>, ProviderError> {
        (**self).users_by_ids(token, ids).await
    }

    async fn all_user_guids(&self, token: &str) -> Result<Vec<String>, ProviderError> {
        (**self).all_user_guids(token).await
    }

    async fn user_guids_with_scope(
        &self,
        token: &str,
        scope: &str,
    ) -> Result<Vec<String>, ProviderError> {
        (**self).user_guids_with_scope(token, scope).await
    }
}

#[async_trait]
impl<T: SpaceMembershipProvider + ?Sized> SpaceMembershipProvider for Arc<T> {
    async fn load_space(&self, token: &str, guid: &str) -> Result<Space, ProviderError> {
        (**self).load_space(token, guid).await
    }

    async fn user_guids_for_space(
        &self,
        token: &str,
        guid: &str,
    ) -> Result<Vec<String>, ProviderError> {
        (**self).user_guids_for_space(token, guid).await
    }
}

#[async_trait]
impl<T: OrgMembershipProvider + ?Sized> OrgMembershipProvider for Arc<T> {
    async fn load_organization(
        &self,
        token: &str,
        guid: &str,
    ) -> Result<Organization, ProviderError> {
        (**self).load_organization(token, guid).await
    }

    async fn user_guids_for_organization(
        &self,
        token: &str,
        guid: &str,
        role: Option<OrgRole>,
    ) -> Result<Vec<String>, ProviderError> {
        (**self).user_guids_for_organization(token, guid, role).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_roles_parse_exactly() {
        assert_eq!("OrgManager".parse::<OrgRole>(), Ok(OrgRole::OrgManager));
        assert_eq!("BillingManager".parse::<OrgRole>(), Ok(OrgRole::BillingManager));
        assert!("orgmanager".parse::<OrgRole>().is_err());
        assert!("SpaceDeveloper".parse::<OrgRole>().is_err());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            ProviderError::from_status(reqwest::StatusCode::NOT_FOUND, "space"),
            ProviderError::NotFound(_)
        ));
        assert!(matches!(
            ProviderError::from_status(reqwest::StatusCode::BAD_GATEWAY, "space"),
            ProviderError::ServiceDown(_)
        ));
    }
}
