use async_trait::async_trait;
use tracing::instrument;

use herald_core::{Dispatch, Response};

use super::{Audience, Resolved, Strategy, StrategyDeps};
use crate::audience::users_with_emails;
use crate::endorsement::Endorsement;
use crate::error::DispatchError;

/// A single user addressed by GUID.
pub struct UserStrategy {
    deps: StrategyDeps,
}

impl UserStrategy {
    pub fn new(deps: StrategyDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Strategy for UserStrategy {
    fn audience(&self) -> Audience {
        Audience::User
    }

    #[instrument(skip_all, fields(user = %dispatch.guid), err)]
    async fn dispatch(&self, dispatch: &Dispatch) -> Result<Vec<Response>, DispatchError> {
        let token = self.deps.tokens.token().await?;
        let users =
            users_with_emails(self.deps.identity.as_ref(), &token, &[dispatch.guid.clone()]).await?;

        let resolved = Resolved {
            users,
            ..Resolved::default()
        };
        self.deps
            .admit(Audience::User, dispatch, resolved, Endorsement::User)
            .await
    }
}
