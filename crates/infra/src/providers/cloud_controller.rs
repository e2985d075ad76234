//! Cloud Controller v2 adapter: space/org lookups and paginated memberships.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::instrument;

use super::{
    Organization, OrgMembershipProvider, OrgRole, ProviderError, Space, SpaceMembershipProvider,
};

const RESULTS_PER_PAGE: &str = "100";

#[derive(Debug, Clone)]
pub struct CloudControllerClient {
    client: Client,
    host: String,
}

impl CloudControllerClient {
    pub fn new(host: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        token: &str,
        path_and_query: &str,
        what: &str,
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(format!("{}{}", self.host, path_and_query))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::transport(e, what))?;

        if !response.status().is_success() {
            return Err(ProviderError::from_status(response.status(), what));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::transport(e, what))
    }

    /// Walk `next_url` links and collect every resource guid.
    async fn member_guids(
        &self,
        token: &str,
        path: &str,
        what: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let mut guids = Vec::new();
        let mut next = Some(format!("{path}?results-per-page={RESULTS_PER_PAGE}"));

        while let Some(url) = next.take() {
            let page: Page<Member> = self.get(token, &url, what).await?;
            guids.extend(page.resources.into_iter().map(|r| r.metadata.guid));
            next = page.next_url;
        }
        Ok(guids)
    }
}

#[derive(Debug, Deserialize)]
struct Metadata {
    guid: String,
}

#[derive(Debug, Deserialize)]
struct Resource<E> {
    metadata: Metadata,
    entity: E,
}

#[derive(Debug, Deserialize)]
struct Member {
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    resources: Vec<T>,
    #[serde(default)]
    next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpaceEntity {
    name: String,
    organization_guid: String,
}

#[derive(Debug, Deserialize)]
struct OrganizationEntity {
    name: String,
}

#[async_trait]
impl SpaceMembershipProvider for CloudControllerClient {
    #[instrument(skip(self, token), err)]
    async fn load_space(&self, token: &str, guid: &str) -> Result<Space, ProviderError> {
        let space: Resource<SpaceEntity> = self
            .get(token, &format!("/v2/spaces/{guid}"), &format!("space {guid}"))
            .await?;
        Ok(Space {
            guid: space.metadata.guid,
            name: space.entity.name,
            organization_guid: space.entity.organization_guid,
        })
    }

    #[instrument(skip(self, token), err)]
    async fn user_guids_for_space(
        &self,
        token: &str,
        guid: &str,
    ) -> Result<Vec<String>, ProviderError> {
        self.member_guids(
            token,
            &format!("/v2/spaces/{guid}/users"),
            &format!("space {guid}"),
        )
        .await
    }
}

#[async_trait]
impl OrgMembershipProvider for CloudControllerClient {
    #[instrument(skip(self, token), err)]
    async fn load_organization(
        &self,
        token: &str,
        guid: &str,
    ) -> Result<Organization, ProviderError> {
        let org: Resource<OrganizationEntity> = self
            .get(
                token,
                &format!("/v2/organizations/{guid}"),
                &format!("organization {guid}"),
            )
            .await?;
        Ok(Organization {
            guid: org.metadata.guid,
            name: org.entity.name,
        })
    }

    #[instrument(skip(self, token), err)]
    async fn user_guids_for_organization(
        &self,
        token: &str,
        guid: &str,
        role: Option<OrgRole>,
    ) -> Result<Vec<String>, ProviderError> {
        let collection = role.map_or("users", |r| r.collection());
        self.member_guids(
            token,
            &format!("/v2/organizations/{guid}/{collection}"),
            &format!("organization {guid}"),
        )
        .await
    }
}
