use async_trait::async_trait;
use tracing::instrument;

use herald_core::{Dispatch, Response};
use herald_infra::providers::OrgRole;

use super::{Audience, Resolved, Strategy, StrategyDeps};
use crate::audience::users_with_emails;
use crate::endorsement::Endorsement;
use crate::error::DispatchError;

fn parse_role(role: Option<&str>) -> Result<Option<OrgRole>, DispatchError> {
    match role.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| DispatchError::InvalidRole(raw.to_string())),
    }
}

async fn dispatch_to_organization(
    deps: &StrategyDeps,
    audience: Audience,
    dispatch: &Dispatch,
    role: Option<OrgRole>,
) -> Result<Vec<Response>, DispatchError> {
    let token = deps.tokens.token().await?;

    let organization = deps
        .organizations
        .load_organization(&token, &dispatch.guid)
        .await?;
    let guids = deps
        .organizations
        .user_guids_for_organization(&token, &organization.guid, role)
        .await?;
    let users = users_with_emails(deps.identity.as_ref(), &token, &guids).await?;

    let endorsement = match role {
        Some(role) => Endorsement::OrganizationRole {
            role: role.as_str(),
            organization: &organization.name,
        },
        None => Endorsement::Organization {
            organization: &organization.name,
        },
    };
    let resolved = Resolved {
        users,
        organization: organization.name.clone(),
        role: role.map(|r| r.as_str().to_string()).unwrap_or_default(),
        ..Resolved::default()
    };
    deps.admit(audience, dispatch, resolved, endorsement).await
}

/// Every member of an organization, optionally narrowed by `Dispatch::role`.
pub struct OrganizationStrategy {
    deps: StrategyDeps,
}

impl OrganizationStrategy {
    pub fn new(deps: StrategyDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Strategy for OrganizationStrategy {
    fn audience(&self) -> Audience {
        Audience::Organization
    }

    #[instrument(skip_all, fields(organization = %dispatch.guid), err)]
    async fn dispatch(&self, dispatch: &Dispatch) -> Result<Vec<Response>, DispatchError> {
        let role = parse_role(dispatch.role.as_deref())?;
        dispatch_to_organization(&self.deps, Audience::Organization, dispatch, role).await
    }
}

/// Organization members holding a specific role. The role is mandatory.
pub struct OrganizationRoleStrategy {
    deps: StrategyDeps,
}

impl OrganizationRoleStrategy {
    pub fn new(deps: StrategyDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Strategy for OrganizationRoleStrategy {
    fn audience(&self) -> Audience {
        Audience::OrganizationRole
    }

    #[instrument(skip_all, fields(organization = %dispatch.guid, role = ?dispatch.role), err)]
    async fn dispatch(&self, dispatch: &Dispatch) -> Result<Vec<Response>, DispatchError> {
        let role = parse_role(dispatch.role.as_deref())?
            .ok_or_else(|| DispatchError::InvalidRole(String::new()))?;
        dispatch_to_organization(&self.deps, Audience::OrganizationRole, dispatch, Some(role))
            .await
    }
}
