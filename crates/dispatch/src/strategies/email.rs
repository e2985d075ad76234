use async_trait::async_trait;
use tracing::instrument;

use herald_core::{Dispatch, Response, User};

use super::{Audience, Resolved, Strategy, StrategyDeps};
use crate::endorsement::Endorsement;
use crate::error::DispatchError;

/// A raw email address. No token or lookups; address syntax is checked at
/// delivery time.
pub struct EmailStrategy {
    deps: StrategyDeps,
}

impl EmailStrategy {
    pub fn new(deps: StrategyDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Strategy for EmailStrategy {
    fn audience(&self) -> Audience {
        Audience::Email
    }

    #[instrument(skip_all, err)]
    async fn dispatch(&self, dispatch: &Dispatch) -> Result<Vec<Response>, DispatchError> {
        let to = dispatch.message.to.trim();
        if to.is_empty() {
            return Err(DispatchError::Validation(
                "email dispatch requires a \"to\" address".to_string(),
            ));
        }

        let resolved = Resolved {
            users: vec![User::with_email(to)],
            ..Resolved::default()
        };
        self.deps
            .admit(Audience::Email, dispatch, resolved, Endorsement::Email)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::testing::{dispatch, harness};
    use herald_core::DispatchMessage;
    use herald_infra::providers::InMemoryDirectory;

    #[tokio::test]
    async fn sends_to_raw_address_without_token() {
        let h = harness(InMemoryDirectory::new()).await;
        let dispatch = dispatch("").with_message(DispatchMessage {
            to: "someone@example.com".into(),
            text: "hi".into(),
            ..DispatchMessage::default()
        });

        let responses = EmailStrategy::new(h.deps.clone())
            .dispatch(&dispatch)
            .await
            .unwrap();

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].recipient, "someone@example.com");
        assert_eq!(responses[0].email, "someone@example.com");
        assert_eq!(h.directory.token_calls(), 0);

        let request = h.enqueuer.last();
        assert!(request.users[0].guid.is_none());
        assert_eq!(request.options.templates.subject, "CF Notification: {{ kind_description }}");
    }

    #[tokio::test]
    async fn missing_address_is_validation_error() {
        let h = harness(InMemoryDirectory::new()).await;

        let err = EmailStrategy::new(h.deps.clone())
            .dispatch(&dispatch(""))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Validation(_)));
        assert_eq!(h.enqueuer.calls(), 0);
    }
}
