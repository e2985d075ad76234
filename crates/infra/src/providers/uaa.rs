//! UAA adapter: client-credentials tokens, SCIM user and group lookups.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{IdentityProvider, IdentityUser, ProviderError, TokenProvider};

/// SCIM page size for user listings.
const PAGE_SIZE: usize = 500;
/// Filter clauses per user lookup request.
const LOOKUP_BATCH: usize = 50;
/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// HTTP client for the UAA identity service.
#[derive(Debug)]
pub struct UaaClient {
    client: Client,
    host: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl UaaClient {
    pub fn new(
        host: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cached: Mutex::new(None),
        }
    }

    fn cached_token(&self) -> Option<String> {
        let cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        cached
            .as_ref()
            .filter(|t| t.expires_at > Instant::now())
            .map(|t| t.value.clone())
    }

    async fn get<T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(format!("{}{}", self.host, path))
            .bearer_auth(token)
            .query(query)
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
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    600
}

#[derive(Debug, Deserialize)]
struct ScimEmail {
    value: String,
    #[serde(default)]
    primary: bool,
}

#[derive(Debug, Deserialize)]
struct ScimUser {
    id: String,
    #[serde(default)]
    emails: Vec<ScimEmail>,
}

impl From<ScimUser> for IdentityUser {
    fn from(user: ScimUser) -> Self {
        let email = user
            .emails
            .iter()
            .find(|e| e.primary)
            .or_else(|| user.emails.first())
            .map(|e| e.value.clone());
        IdentityUser {
            guid: user.id,
            email,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScimList<T> {
    #[serde(default = "Vec::new")]
    resources: Vec<T>,
    #[serde(default, rename = "totalResults")]
    total_results: usize,
}

#[derive(Debug, Deserialize)]
struct GroupMember {
    value: String,
}

#[derive(Debug, Deserialize)]
struct ScimGroup {
    #[serde(default)]
    members: Vec<GroupMember>,
}

#[async_trait]
impl TokenProvider for UaaClient {
    #[instrument(skip(self), err)]
    async fn token(&self) -> Result<String, ProviderError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let response = self
            .client
            .post(format!("{}/oauth/token", self.host))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ProviderError::transport(e, "token"))?;

        if !response.status().is_success() {
            return Err(ProviderError::from_status(response.status(), "token"));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::transport(e, "token"))?;

        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(EXPIRY_MARGIN);
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedToken {
            value: body.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        debug!(expires_in = body.expires_in, "issued service token");

        Ok(body.access_token)
    }
}

#[async_trait]
impl IdentityProvider for UaaClient {
    #[instrument(skip(self, token, ids), fields(count = ids.len()), err)]
    async fn users_by_ids(
        &self,
        token: &str,
        ids: &[String],
    ) -> Result<Vec<IdentityUser>, ProviderError> {
        let mut users = Vec::with_capacity(ids.len());
        for batch in ids.chunks(LOOKUP_BATCH) {
            let filter = batch
                .iter()
                .map(|id| format!("id eq \"{id}\""))
                .collect::<Vec<_>>()
                .join(" or ");
            let page: ScimList<ScimUser> = self
                .get(
                    token,
                    "/Users",
                    &[
                        ("filter", filter),
                        ("attributes", "id,emails".to_string()),
                        ("count", batch.len().to_string()),
                    ],
                    "users",
                )
                .await?;
            users.extend(page.resources.into_iter().map(IdentityUser::from));
        }
        Ok(users)
    }

    #[instrument(skip(self, token), err)]
    async fn all_user_guids(&self, token: &str) -> Result<Vec<String>, ProviderError> {
        let mut guids = Vec::new();
        let mut start_index = 1;
        loop {
            let page: ScimList<ScimUser> = self
                .get(
                    token,
                    "/Users",
                    &[
                        ("attributes", "id".to_string()),
                        ("startIndex", start_index.to_string()),
                        ("count", PAGE_SIZE.to_string()),
                    ],
                    "users",
                )
                .await?;

            let fetched = page.resources.len();
            guids.extend(page.resources.into_iter().map(|u| u.id));
            start_index += fetched;
            if fetched == 0 || guids.len() >= page.total_results {
                return Ok(guids);
            }
        }
    }

    #[instrument(skip(self, token), err)]
    async fn user_guids_with_scope(
        &self,
        token: &str,
        scope: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let page: ScimList<ScimGroup> = self
            .get(
                token,
                "/Groups",
                &[
                    ("filter", format!("displayName eq \"{scope}\"")),
                    ("attributes", "members".to_string()),
                ],
                "groups",
            )
            .await?;

        let group = page
            .resources
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound(format!("scope {scope}")))?;
        Ok(group.members.into_iter().map(|m| m.value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn stub(token_calls: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/oauth/token",
                post(|State(calls): State<Arc<AtomicUsize>>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"access_token": "tok", "expires_in": 3600}))
                }),
            )
            .route(
                "/Users",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    match q.get("filter") {
                        Some(filter) => {
                            let mut resources = Vec::new();
                            if filter.contains("user-1") {
                                resources.push(json!({"id": "user-1", "emails": [{"value": "one@example.com"}]}));
                            }
                            if filter.contains("user-2") {
                                resources.push(json!({"id": "user-2", "emails": []}));
                            }
                            let total = resources.len();
                            Json(json!({"resources": resources, "totalResults": total}))
                        }
                        None => {
                            let start: usize = q.get("startIndex").and_then(|s| s.parse().ok()).unwrap_or(1);
                            let resources: Vec<Value> = if start == 1 {
                                vec![json!({"id": "a"}), json!({"id": "b"})]
                            } else if start == 3 {
                                vec![json!({"id": "c"})]
                            } else {
                                vec![]
                            };
                            Json(json!({"resources": resources, "totalResults": 3}))
                        }
                    }
                }),
            )
            .route(
                "/Groups",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    if q.get("filter").is_some_and(|f| f.contains("notification_preferences.admin")) {
                        (StatusCode::OK, Json(json!({"resources": [{"members": [{"value": "admin-1"}]}]})))
                    } else if q.get("filter").is_some_and(|f| f.contains("broken")) {
                        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({})))
                    } else {
                        (StatusCode::OK, Json(json!({"resources": []})))
                    }
                }),
            )
            .with_state(token_calls)
    }

    #[tokio::test]
    async fn token_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let host = serve(stub(calls.clone())).await;
        let uaa = UaaClient::new(host, "notifications", "secret");

        assert_eq!(uaa.token().await.unwrap(), "tok");
        assert_eq!(uaa.token().await.unwrap(), "tok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn users_by_ids_maps_emails() {
        let host = serve(stub(Arc::new(AtomicUsize::new(0)))).await;
        let uaa = UaaClient::new(host, "id", "secret");

        let mut users = uaa
            .users_by_ids("tok", &["user-1".to_string(), "user-2".to_string()])
            .await
            .unwrap();
        users.sort_by(|a, b| a.guid.cmp(&b.guid));

        assert_eq!(users[0].email.as_deref(), Some("one@example.com"));
        assert_eq!(users[1].email, None);
    }

    #[tokio::test]
    async fn all_users_follows_pages() {
        let host = serve(stub(Arc::new(AtomicUsize::new(0)))).await;
        let uaa = UaaClient::new(host, "id", "secret");

        assert_eq!(uaa.all_user_guids("tok").await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn scope_lookup_errors() {
        let host = serve(stub(Arc::new(AtomicUsize::new(0)))).await;
        let uaa = UaaClient::new(host, "id", "secret");

        assert_eq!(
            uaa.user_guids_with_scope("tok", "notification_preferences.admin")
                .await
                .unwrap(),
            vec!["admin-1"]
        );
        assert!(matches!(
            uaa.user_guids_with_scope("tok", "unknown.scope").await,
            Err(ProviderError::NotFound(_))
        ));
        assert!(matches!(
            uaa.user_guids_with_scope("tok", "broken.scope").await,
            Err(ProviderError::ServiceDown(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_host_is_service_down() {
        let uaa = UaaClient::new("http://127.0.0.1:1", "id", "secret");
        assert!(matches!(uaa.token().await, Err(ProviderError::ServiceDown(_))));
    }
}
