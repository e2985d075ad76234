//! Unsubscribe state: per client/kind and global, keyed by user GUID.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::db::{map_sqlx_error, StoreError};

#[async_trait]
pub trait UnsubscribeStore: Send + Sync {
    async fn is_unsubscribed(
        &self,
        user_guid: &str,
        client_id: &str,
        kind_id: &str,
    ) -> Result<bool, StoreError>;

    async fn is_globally_unsubscribed(&self, user_guid: &str) -> Result<bool, StoreError>;

    async fn set_unsubscribed(
        &self,
        user_guid: &str,
        client_id: &str,
        kind_id: &str,
        unsubscribed: bool,
    ) -> Result<(), StoreError>;

    async fn set_globally_unsubscribed(
        &self,
        user_guid: &str,
        unsubscribed: bool,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: UnsubscribeStore + ?Sized> UnsubscribeStore for Arc<S> {
    async fn is_unsubscribed(
        &self,
        user_guid: &str,
        client_id: &str,
        kind_id: &str,
    ) -> Result<bool, StoreError> {
        (**self).is_unsubscribed(user_guid, client_id, kind_id).await
    }

    async fn is_globally_unsubscribed(&self, user_guid: &str) -> Result<bool, StoreError> {
        (**self).is_globally_unsubscribed(user_guid).await
    }

    async fn set_unsubscribed(
        &self,
        user_guid: &str,
        client_id: &str,
        kind_id: &str,
        unsubscribed: bool,
    ) -> Result<(), StoreError> {
        (**self)
            .set_unsubscribed(user_guid, client_id, kind_id, unsubscribed)
            .await
    }

    async fn set_globally_unsubscribed(
        &self,
        user_guid: &str,
        unsubscribed: bool,
    ) -> Result<(), StoreError> {
        (**self).set_globally_unsubscribed(user_guid, unsubscribed).await
    }
}

#[derive(Debug, Default)]
struct Preferences {
    per_kind: HashSet<(String, String, String)>,
    global: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryPreferences {
    inner: Mutex<Preferences>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Preferences> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn key(user_guid: &str, client_id: &str, kind_id: &str) -> (String, String, String) {
    (
        user_guid.to_string(),
        client_id.to_string(),
        kind_id.to_string(),
    )
}

#[async_trait]
impl UnsubscribeStore for InMemoryPreferences {
    async fn is_unsubscribed(
        &self,
        user_guid: &str,
        client_id: &str,
        kind_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .per_kind
            .contains(&key(user_guid, client_id, kind_id)))
    }

    async fn is_globally_unsubscribed(&self, user_guid: &str) -> Result<bool, StoreError> {
        Ok(self.lock().global.contains(user_guid))
    }

    async fn set_unsubscribed(
        &self,
        user_guid: &str,
        client_id: &str,
        kind_id: &str,
        unsubscribed: bool,
    ) -> Result<(), StoreError> {
        let mut prefs = self.lock();
        let key = key(user_guid, client_id, kind_id);
        if unsubscribed {
            prefs.per_kind.insert(key);
        } else {
            prefs.per_kind.remove(&key);
        }
        Ok(())
    }

    async fn set_globally_unsubscribed(
        &self,
        user_guid: &str,
        unsubscribed: bool,
    ) -> Result<(), StoreError> {
        let mut prefs = self.lock();
        if unsubscribed {
            prefs.global.insert(user_guid.to_string());
        } else {
            prefs.global.remove(user_guid);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PostgresPreferences {
    pool: PgPool,
}

impl PostgresPreferences {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnsubscribeStore for PostgresPreferences {
    async fn is_unsubscribed(
        &self,
        user_guid: &str,
        client_id: &str,
        kind_id: &str,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM unsubscribes
                WHERE user_id = $1 AND client_id = $2 AND kind_id = $3
            ) AS present
            "#,
        )
        .bind(user_guid)
        .bind(client_id)
        .bind(kind_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("is_unsubscribed", e))?;

        row.try_get("present")
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn is_globally_unsubscribed(&self, user_guid: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM global_unsubscribes WHERE user_id = $1) AS present",
        )
        .bind(user_guid)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("is_globally_unsubscribed", e))?;

        row.try_get("present")
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn set_unsubscribed(
        &self,
        user_guid: &str,
        client_id: &str,
        kind_id: &str,
        unsubscribed: bool,
    ) -> Result<(), StoreError> {
        let sql = if unsubscribed {
            r#"
            INSERT INTO unsubscribes (user_id, client_id, kind_id)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#
        } else {
            "DELETE FROM unsubscribes WHERE user_id = $1 AND client_id = $2 AND kind_id = $3"
        };

        sqlx::query(sql)
            .bind(user_guid)
            .bind(client_id)
            .bind(kind_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_unsubscribed", e))?;
        Ok(())
    }

    async fn set_globally_unsubscribed(
        &self,
        user_guid: &str,
        unsubscribed: bool,
    ) -> Result<(), StoreError> {
        let sql = if unsubscribed {
            "INSERT INTO global_unsubscribes (user_id) VALUES ($1) ON CONFLICT DO NOTHING"
        } else {
            "DELETE FROM global_unsubscribes WHERE user_id = $1"
        };

        sqlx::query(sql)
            .bind(user_guid)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_globally_unsubscribed", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn per_kind_is_scoped_to_client_and_kind() {
        let prefs = InMemoryPreferences::new();
        prefs
            .set_unsubscribed("user-1", "client", "kind", true)
            .await
            .unwrap();

        assert!(prefs.is_unsubscribed("user-1", "client", "kind").await.unwrap());
        assert!(!prefs.is_unsubscribed("user-1", "client", "other").await.unwrap());
        assert!(!prefs.is_unsubscribed("user-2", "client", "kind").await.unwrap());

        prefs
            .set_unsubscribed("user-1", "client", "kind", false)
            .await
            .unwrap();
        assert!(!prefs.is_unsubscribed("user-1", "client", "kind").await.unwrap());
    }

    #[tokio::test]
    async fn global_toggle() {
        let prefs = InMemoryPreferences::new();
        prefs.set_globally_unsubscribed("user-1", true).await.unwrap();
        assert!(prefs.is_globally_unsubscribed("user-1").await.unwrap());

        prefs.set_globally_unsubscribed("user-1", false).await.unwrap();
        assert!(!prefs.is_globally_unsubscribed("user-1").await.unwrap());
    }
}
