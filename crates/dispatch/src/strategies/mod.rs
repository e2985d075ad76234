//! One dispatch strategy per audience type.
//!
//! Every strategy follows the same shape: load a service token, resolve the
//! audience, look up emails, render the endorsement, load templates and hand the
//! recipients to the enqueuer. Anything failing before the enqueuer leaves no
//! durable trace.

mod email;
mod everyone;
mod organization;
mod scope;
mod space;
mod user;

pub use email::EmailStrategy;
pub use everyone::EveryoneStrategy;
pub use organization::{OrganizationRoleStrategy, OrganizationStrategy};
pub use scope::{is_default_scope, ScopeStrategy, DEFAULT_SCOPES};
pub use space::SpaceStrategy;
pub use user::UserStrategy;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use herald_core::{Dispatch, Options, Response, User};
use herald_infra::providers::{
    IdentityProvider, OrgMembershipProvider, SpaceMembershipProvider, TokenProvider,
};
use herald_infra::templates::{self, TemplateLoader};

use crate::endorsement::Endorsement;
use crate::enqueuer::{EnqueueRequest, Enqueuer};
use crate::error::DispatchError;

/// Audience types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    User,
    Space,
    Organization,
    OrganizationRole,
    Scope,
    Everyone,
    Email,
}

impl Audience {
    pub const ALL: [Audience; 7] = [
        Audience::User,
        Audience::Space,
        Audience::Organization,
        Audience::OrganizationRole,
        Audience::Scope,
        Audience::Everyone,
        Audience::Email,
    ];

    /// Template suffix for the message body.
    pub fn content_suffix(&self) -> &'static str {
        match self {
            Audience::User | Audience::Everyone => templates::USER_BODY,
            Audience::Space => templates::SPACE_BODY,
            Audience::Organization | Audience::OrganizationRole => templates::ORGANIZATION_BODY,
            Audience::Scope => templates::UAA_SCOPE_BODY,
            Audience::Email => templates::EMAIL_BODY,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::User => "user",
            Audience::Space => "space",
            Audience::Organization => "organization",
            Audience::OrganizationRole => "organization_role",
            Audience::Scope => "scope",
            Audience::Everyone => "everyone",
            Audience::Email => "email",
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn audience(&self) -> Audience;

    async fn dispatch(&self, dispatch: &Dispatch) -> Result<Vec<Response>, DispatchError>;
}

/// Collaborators shared by every strategy.
#[derive(Clone)]
pub struct StrategyDeps {
    pub tokens: Arc<dyn TokenProvider>,
    pub identity: Arc<dyn IdentityProvider>,
    pub spaces: Arc<dyn SpaceMembershipProvider>,
    pub organizations: Arc<dyn OrgMembershipProvider>,
    pub templates: Arc<dyn TemplateLoader>,
    pub enqueuer: Arc<dyn Enqueuer>,
}

/// Resolved audience context handed to `admit`.
#[derive(Debug, Default)]
pub(crate) struct Resolved {
    pub users: Vec<User>,
    pub space: String,
    pub organization: String,
    pub scope: String,
    pub role: String,
}

impl StrategyDeps {
    /// Render, load templates and enqueue. Shared tail of every strategy.
    pub(crate) async fn admit(
        &self,
        audience: Audience,
        dispatch: &Dispatch,
        resolved: Resolved,
        endorsement: Endorsement<'_>,
    ) -> Result<Vec<Response>, DispatchError> {
        let endorsement = endorsement.render()?;
        let templates = self
            .templates
            .load_templates(
                dispatch.subject_suffix(),
                audience.content_suffix(),
                &dispatch.client.id,
                &dispatch.kind.id,
            )
            .await?;

        let message = &dispatch.message;
        let options = Options {
            reply_to: message.reply_to.clone(),
            subject: message.subject.clone(),
            kind_description: dispatch.kind.description.clone(),
            source_description: dispatch.client.description.clone(),
            text: message.text.clone(),
            html: message.html.clone(),
            kind_id: dispatch.kind.id.clone(),
            to: message.to.clone(),
            role: resolved.role,
            endorsement,
            templates,
            critical: dispatch.kind.critical,
        };

        Ok(self
            .enqueuer
            .enqueue(EnqueueRequest {
                users: resolved.users,
                options,
                space: resolved.space,
                organization: resolved.organization,
                client_id: dispatch.client.id.clone(),
                scope: resolved.scope,
                vcap_request_id: dispatch.vcap_request_id.clone(),
                request_received: dispatch.received_at,
            })
            .await)
    }
}

/// Registry selecting the strategy for an audience.
pub struct Strategies {
    strategies: HashMap<Audience, Box<dyn Strategy>>,
}

impl Strategies {
    pub fn new(deps: StrategyDeps) -> Self {
        let all: Vec<Box<dyn Strategy>> = vec![
            Box::new(UserStrategy::new(deps.clone())),
            Box::new(SpaceStrategy::new(deps.clone())),
            Box::new(OrganizationStrategy::new(deps.clone())),
            Box::new(OrganizationRoleStrategy::new(deps.clone())),
            Box::new(ScopeStrategy::new(deps.clone())),
            Box::new(EveryoneStrategy::new(deps.clone())),
            Box::new(EmailStrategy::new(deps)),
        ];

        Self {
            strategies: all.into_iter().map(|s| (s.audience(), s)).collect(),
        }
    }

    pub fn get(&self, audience: Audience) -> Option<&dyn Strategy> {
        self.strategies.get(&audience).map(|s| s.as_ref())
    }

    pub async fn dispatch(
        &self,
        audience: Audience,
        dispatch: &Dispatch,
    ) -> Result<Vec<Response>, DispatchError> {
        let strategy = self
            .get(audience)
            .ok_or_else(|| DispatchError::Validation(format!("no strategy for {audience}")))?;
        strategy.dispatch(dispatch).await
    }
}
