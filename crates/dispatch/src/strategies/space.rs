use async_trait::async_trait;
use tracing::instrument;

use herald_core::{Dispatch, Response};

use super::{Audience, Resolved, Strategy, StrategyDeps};
use crate::audience::users_with_emails;
use crate::endorsement::Endorsement;
use crate::error::DispatchError;

/// Every member of a space.
pub struct SpaceStrategy {
    deps: StrategyDeps,
}

impl SpaceStrategy {
    pub fn new(deps: StrategyDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Strategy for SpaceStrategy {
    fn audience(&self) -> Audience {
        Audience::Space
    }

    #[instrument(skip_all, fields(space = %dispatch.guid), err)]
    async fn dispatch(&self, dispatch: &Dispatch) -> Result<Vec<Response>, DispatchError> {
        let token = self.deps.tokens.token().await?;

        let space = self.deps.spaces.load_space(&token, &dispatch.guid).await?;
        let organization = self
            .deps
            .organizations
            .load_organization(&token, &space.organization_guid)
            .await?;
        let guids = self
            .deps
            .spaces
            .user_guids_for_space(&token, &space.guid)
            .await?;
        let users = users_with_emails(self.deps.identity.as_ref(), &token, &guids).await?;

        let endorsement = Endorsement::Space {
            space: &space.name,
            organization: &organization.name,
        };
        let resolved = Resolved {
            users,
            space: space.name.clone(),
            organization: organization.name.clone(),
            ..Resolved::default()
        };
        self.deps
            .admit(Audience::Space, dispatch, resolved, endorsement)
            .await
    }
}
