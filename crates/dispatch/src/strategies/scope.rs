use async_trait::async_trait;
use tracing::instrument;

use herald_core::{Dispatch, Response};

use super::{Audience, Resolved, Strategy, StrategyDeps};
use crate::audience::users_with_emails;
use crate::endorsement::Endorsement;
use crate::error::DispatchError;

/// Scopes every user holds. Targeting one would notify the whole user base.
pub const DEFAULT_SCOPES: &[&str] = &[
    "cloud_controller.read",
    "cloud_controller.write",
    "openid",
    "approvals.me",
    "cloud_controller_service_permissions.read",
    "scim.me",
    "uaa.user",
    "password.write",
    "scim.userids",
    "oauth.approvals",
];

pub fn is_default_scope(scope: &str) -> bool {
    DEFAULT_SCOPES.contains(&scope)
}

/// Members of the identity group named after a scope.
pub struct ScopeStrategy {
    deps: StrategyDeps,
}

impl ScopeStrategy {
    pub fn new(deps: StrategyDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Strategy for ScopeStrategy {
    fn audience(&self) -> Audience {
        Audience::Scope
    }

    #[instrument(skip_all, fields(scope = %dispatch.guid), err)]
    async fn dispatch(&self, dispatch: &Dispatch) -> Result<Vec<Response>, DispatchError> {
        let scope = dispatch.guid.as_str();
        if is_default_scope(scope) {
            return Err(DispatchError::DefaultScope(scope.to_string()));
        }

        let token = self.deps.tokens.token().await?;
        let guids = self.deps.identity.user_guids_with_scope(&token, scope).await?;
        let users = users_with_emails(self.deps.identity.as_ref(), &token, &guids).await?;

        let resolved = Resolved {
            users,
            scope: scope.to_string(),
            ..Resolved::default()
        };
        self.deps
            .admit(Audience::Scope, dispatch, resolved, Endorsement::Scope { scope })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::testing::{dispatch, harness};
    use herald_infra::providers::InMemoryDirectory;

    #[tokio::test]
    async fn default_scopes_rejected_without_network() {
        for scope in DEFAULT_SCOPES {
            let h = harness(InMemoryDirectory::new()).await;

            let err = ScopeStrategy::new(h.deps.clone())
                .dispatch(&dispatch(scope))
                .await
                .unwrap_err();

            assert_eq!(err, DispatchError::DefaultScope(scope.to_string()));
            assert_eq!(h.directory.membership_calls(), 0);
            assert_eq!(h.directory.token_calls(), 0);
        }
    }

    #[tokio::test]
    async fn resolves_scope_members() {
        let h = harness(
            InMemoryDirectory::new()
                .with_user("admin-1", Some("admin@example.com"))
                .with_scope("notification_preferences.admin", &["admin-1"]),
        )
        .await;

        let responses = ScopeStrategy::new(h.deps.clone())
            .dispatch(&dispatch("notification_preferences.admin"))
            .await
            .unwrap();

        assert_eq!(responses.len(), 1);
        let request = h.enqueuer.last();
        assert_eq!(request.scope, "notification_preferences.admin");
        assert!(request.options.endorsement.contains("notification_preferences.admin scope"));
    }
}
