//! In-memory identity/membership directory for tests and local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{
    IdentityProvider, IdentityUser, Organization, OrgMembershipProvider, OrgRole, ProviderError,
    Space, SpaceMembershipProvider, TokenProvider,
};

#[derive(Debug, Default)]
struct Directory {
    /// Insertion-ordered users
    users: Vec<IdentityUser>,
    spaces: HashMap<String, (Space, Vec<String>)>,
    organizations: HashMap<String, (Organization, Vec<(String, Option<OrgRole>)>)>,
    scopes: HashMap<String, Vec<String>>,
}

/// Implements every provider trait over fixed data.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    data: Mutex<Directory>,
    token_down: AtomicBool,
    token_calls: AtomicUsize,
    membership_calls: AtomicUsize,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, guid: &str, email: Option<&str>) -> Self {
        self.lock().users.push(IdentityUser {
            guid: guid.to_string(),
            email: email.map(str::to_string),
        });
        self
    }

    pub fn with_space(self, guid: &str, name: &str, org_guid: &str, members: &[&str]) -> Self {
        let space = Space {
            guid: guid.to_string(),
            name: name.to_string(),
            organization_guid: org_guid.to_string(),
        };
        self.lock().spaces.insert(
            guid.to_string(),
            (space, members.iter().map(|m| m.to_string()).collect()),
        );
        self
    }

    pub fn with_organization(self, guid: &str, name: &str) -> Self {
        let org = Organization {
            guid: guid.to_string(),
            name: name.to_string(),
        };
        self.lock()
            .organizations
            .entry(guid.to_string())
            .or_insert_with(|| (org, Vec::new()));
        self
    }

    /// Add an org member; `role = None` is a plain member.
    pub fn with_org_member(self, org_guid: &str, user_guid: &str, role: Option<OrgRole>) -> Self {
        if let Some((_, members)) = self.lock().organizations.get_mut(org_guid) {
            members.push((user_guid.to_string(), role));
        }
        self
    }

    pub fn with_scope(self, scope: &str, members: &[&str]) -> Self {
        self.lock().scopes.insert(
            scope.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
        self
    }

    pub fn set_token_down(&self, down: bool) {
        self.token_down.store(down, Ordering::SeqCst);
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    /// Calls to any membership/user lookup.
    pub fn membership_calls(&self) -> usize {
        self.membership_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Directory> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count_call(&self) {
        self.membership_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TokenProvider for InMemoryDirectory {
    async fn token(&self) -> Result<String, ProviderError> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        if self.token_down.load(Ordering::SeqCst) {
            return Err(ProviderError::ServiceDown("token".to_string()));
        }
        Ok("in-memory-token".to_string())
    }
}

#[async_trait]
impl IdentityProvider for InMemoryDirectory {
    async fn users_by_ids(
        &self,
        _token: &str,
        ids: &[String],
    ) -> Result<Vec<IdentityUser>, ProviderError> {
        self.count_call();
        let data = self.lock();
        Ok(data
            .users
            .iter()
            .filter(|u| ids.contains(&u.guid))
            .cloned()
            .collect())
    }

    async fn all_user_guids(&self, _token: &str) -> Result<Vec<String>, ProviderError> {
        self.count_call();
        Ok(self.lock().users.iter().map(|u| u.guid.clone()).collect())
    }

    async fn user_guids_with_scope(
        &self,
        _token: &str,
        scope: &str,
    ) -> Result<Vec<String>, ProviderError> {
        self.count_call();
        self.lock()
            .scopes
            .get(scope)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("scope {scope}")))
    }
}

#[async_trait]
impl SpaceMembershipProvider for InMemoryDirectory {
    async fn load_space(&self, _token: &str, guid: &str) -> Result<Space, ProviderError> {
        self.count_call();
        self.lock()
            .spaces
            .get(guid)
            .map(|(space, _)| space.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("space {guid}")))
    }

    async fn user_guids_for_space(
        &self,
        _token: &str,
        guid: &str,
    ) -> Result<Vec<String>, ProviderError> {
        self.count_call();
        self.lock()
            .spaces
            .get(guid)
            .map(|(_, members)| members.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("space {guid}")))
    }
}

#[async_trait]
impl OrgMembershipProvider for InMemoryDirectory {
    async fn load_organization(
        &self,
        _token: &str,
        guid: &str,
    ) -> Result<Organization, ProviderError> {
        self.count_call();
        self.lock()
            .organizations
            .get(guid)
            .map(|(org, _)| org.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("organization {guid}")))
    }

    async fn user_guids_for_organization(
        &self,
        _token: &str,
        guid: &str,
        role: Option<OrgRole>,
    ) -> Result<Vec<String>, ProviderError> {
        self.count_call();
        let data = self.lock();
        let (_, members) = data
            .organizations
            .get(guid)
            .ok_or_else(|| ProviderError::NotFound(format!("organization {guid}")))?;

        let mut guids: Vec<String> = Vec::new();
        for (user, member_role) in members {
            let matches = match role {
                None => true,
                Some(role) => *member_role == Some(role),
            };
            if matches && !guids.contains(user) {
                guids.push(user.clone());
            }
        }
        Ok(guids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn org_role_filter() {
        let dir = InMemoryDirectory::new()
            .with_organization("org", "Org")
            .with_org_member("org", "manager", Some(OrgRole::OrgManager))
            .with_org_member("org", "auditor", Some(OrgRole::OrgAuditor))
            .with_org_member("org", "plain", None);

        let managers = dir
            .user_guids_for_organization("t", "org", Some(OrgRole::OrgManager))
            .await
            .unwrap();
        assert_eq!(managers, vec!["manager"]);

        let all = dir.user_guids_for_organization("t", "org", None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(dir.membership_calls(), 2);
    }

    #[tokio::test]
    async fn token_outage() {
        let dir = InMemoryDirectory::new();
        dir.set_token_down(true);
        assert!(matches!(dir.token().await, Err(ProviderError::ServiceDown(_))));
        assert_eq!(dir.token_calls(), 1);
    }
}
