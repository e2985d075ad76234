use async_trait::async_trait;
use tracing::instrument;

use herald_core::{Dispatch, Response};

use super::{Audience, Resolved, Strategy, StrategyDeps};
use crate::audience::users_with_emails;
use crate::endorsement::Endorsement;
use crate::error::DispatchError;

/// Every user known to the identity service.
pub struct EveryoneStrategy {
    deps: StrategyDeps,
}

impl EveryoneStrategy {
    pub fn new(deps: StrategyDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Strategy for EveryoneStrategy {
    fn audience(&self) -> Audience {
        Audience::Everyone
    }

    #[instrument(skip_all, err)]
    async fn dispatch(&self, dispatch: &Dispatch) -> Result<Vec<Response>, DispatchError> {
        let token = self.deps.tokens.token().await?;
        let guids = self.deps.identity.all_user_guids(&token).await?;
        let users = users_with_emails(self.deps.identity.as_ref(), &token, &guids).await?;

        let resolved = Resolved {
            users,
            ..Resolved::default()
        };
        self.deps
            .admit(Audience::Everyone, dispatch, resolved, Endorsement::Everyone)
            .await
    }
}
