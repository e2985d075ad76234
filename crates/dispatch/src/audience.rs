//! Turn resolved GUIDs into recipients.

use std::collections::HashMap;

use herald_core::User;
use herald_infra::providers::{IdentityProvider, ProviderError};

/// Look up emails for `guids`, keeping input order and duplicates.
///
/// GUIDs the identity service does not know become recipients without an email;
/// the worker records them as undeliverable.
pub async fn users_with_emails(
    identity: &dyn IdentityProvider,
    token: &str,
    guids: &[String],
) -> Result<Vec<User>, ProviderError> {
    if guids.is_empty() {
        return Ok(Vec::new());
    }

    let emails: HashMap<String, Option<String>> = identity
        .users_by_ids(token, guids)
        .await?
        .into_iter()
        .map(|u| (u.guid, u.email))
        .collect();

    Ok(guids
        .iter()
        .map(|guid| User::with_guid(guid.clone()).email(emails.get(guid).cloned().flatten()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_infra::providers::InMemoryDirectory;

    #[tokio::test]
    async fn keeps_order_duplicates_and_unknowns() {
        let dir = InMemoryDirectory::new()
            .with_user("b", Some("b@example.com"))
            .with_user("a", Some("a@example.com"));

        let guids: Vec<String> = ["a", "b", "a", "ghost"].iter().map(|s| s.to_string()).collect();
        let users = users_with_emails(&dir, "tok", &guids).await.unwrap();

        let recipients: Vec<_> = users.iter().map(|u| u.recipient()).collect();
        assert_eq!(recipients, vec!["a", "b", "a", "ghost"]);
        assert_eq!(users[0].email.as_deref(), Some("a@example.com"));
        assert_eq!(users[3].email, None);
    }

    #[tokio::test]
    async fn empty_audience_skips_lookup() {
        let dir = InMemoryDirectory::new();
        assert!(users_with_emails(&dir, "tok", &[]).await.unwrap().is_empty());
        assert_eq!(dir.membership_calls(), 0);
    }
}
