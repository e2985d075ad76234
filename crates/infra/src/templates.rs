//! Template storage and client → kind → default fallback loading.
//!
//! Names are `"{client}.{kind}.{suffix}"`, `"{client}.{suffix}"` and `"{suffix}"`,
//! tried in that order. Defaults for every suffix are seeded at startup so the
//! last step only fails if the store was never seeded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{debug, instrument};

use herald_core::Templates;

use crate::db::{map_sqlx_error, StoreError};

pub const SUBJECT_PROVIDED: &str = "subject.provided";
pub const SUBJECT_MISSING: &str = "subject.missing";
pub const USER_BODY: &str = "user_body";
pub const SPACE_BODY: &str = "space_body";
pub const ORGANIZATION_BODY: &str = "organization_body";
pub const UAA_SCOPE_BODY: &str = "uaa_scope_body";
pub const EMAIL_BODY: &str = "email_body";

/// A stored text/html template pair. Subject templates only use `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub text: String,
    pub html: String,
}

impl Template {
    pub fn new(text: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: html.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("no template found for {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Template>, StoreError>;

    async fn upsert(&self, name: &str, template: &Template) -> Result<(), StoreError>;

    /// Insert only when `name` is absent. Returns whether a row was written.
    async fn insert_if_absent(&self, name: &str, template: &Template) -> Result<bool, StoreError>;
}

#[async_trait]
impl<S: TemplateStore + ?Sized> TemplateStore for Arc<S> {
    async fn get(&self, name: &str) -> Result<Option<Template>, StoreError> {
        (**self).get(name).await
    }

    async fn upsert(&self, name: &str, template: &Template) -> Result<(), StoreError> {
        (**self).upsert(name, template).await
    }

    async fn insert_if_absent(&self, name: &str, template: &Template) -> Result<bool, StoreError> {
        (**self).insert_if_absent(name, template).await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTemplateStore {
    templates: Mutex<HashMap<String, Template>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn get(&self, name: &str) -> Result<Option<Template>, StoreError> {
        Ok(self
            .templates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned())
    }

    async fn upsert(&self, name: &str, template: &Template) -> Result<(), StoreError> {
        self.templates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), template.clone());
        Ok(())
    }

    async fn insert_if_absent(&self, name: &str, template: &Template) -> Result<bool, StoreError> {
        let mut templates = self.templates.lock().unwrap_or_else(PoisonError::into_inner);
        if templates.contains_key(name) {
            return Ok(false);
        }
        templates.insert(name.to_string(), template.clone());
        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct PostgresTemplateStore {
    pool: PgPool,
}

impl PostgresTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateStore for PostgresTemplateStore {
    async fn get(&self, name: &str) -> Result<Option<Template>, StoreError> {
        let row = sqlx::query("SELECT text, html FROM templates WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_template", e))?;

        row.map(|row| -> Result<Template, StoreError> {
            Ok(Template {
                text: row.try_get("text").map_err(|e| StoreError::Corrupt(e.to_string()))?,
                html: row.try_get("html").map_err(|e| StoreError::Corrupt(e.to_string()))?,
            })
        })
        .transpose()
    }

    async fn upsert(&self, name: &str, template: &Template) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO templates (name, text, html, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (name)
            DO UPDATE SET text = EXCLUDED.text, html = EXCLUDED.html, updated_at = NOW()
            "#,
        )
        .bind(name)
        .bind(&template.text)
        .bind(&template.html)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_template", e))?;
        Ok(())
    }

    async fn insert_if_absent(&self, name: &str, template: &Template) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO templates (name, text, html, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(&template.text)
        .bind(&template.html)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("seed_template", e))?;
        Ok(result.rows_affected() > 0)
    }
}

/// Resolves the subject/text/html sources for one dispatch.
#[async_trait]
pub trait TemplateLoader: Send + Sync {
    async fn load_templates(
        &self,
        subject_suffix: &str,
        content_suffix: &str,
        client_id: &str,
        kind_id: &str,
    ) -> Result<Templates, TemplateError>;
}

#[async_trait]
impl<L: TemplateLoader + ?Sized> TemplateLoader for Arc<L> {
    async fn load_templates(
        &self,
        subject_suffix: &str,
        content_suffix: &str,
        client_id: &str,
        kind_id: &str,
    ) -> Result<Templates, TemplateError> {
        (**self)
            .load_templates(subject_suffix, content_suffix, client_id, kind_id)
            .await
    }
}

/// Loader over a `TemplateStore` with client → kind → default fallback.
pub struct FallbackTemplateLoader {
    store: Arc<dyn TemplateStore>,
}

impl FallbackTemplateLoader {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self { store }
    }

    /// Candidate names, most specific first.
    pub fn candidates(suffix: &str, client_id: &str, kind_id: &str) -> Vec<String> {
        let mut names = Vec::with_capacity(3);
        if !client_id.is_empty() {
            if !kind_id.is_empty() {
                names.push(format!("{client_id}.{kind_id}.{suffix}"));
            }
            names.push(format!("{client_id}.{suffix}"));
        }
        names.push(suffix.to_string());
        names
    }

    async fn resolve(
        &self,
        suffix: &str,
        client_id: &str,
        kind_id: &str,
    ) -> Result<Template, TemplateError> {
        for name in Self::candidates(suffix, client_id, kind_id) {
            if let Some(template) = self.store.get(&name).await? {
                debug!(template = %name, "template resolved");
                return Ok(template);
            }
        }
        Err(TemplateError::NotFound(suffix.to_string()))
    }
}

#[async_trait]
impl TemplateLoader for FallbackTemplateLoader {
    #[instrument(skip(self), err)]
    async fn load_templates(
        &self,
        subject_suffix: &str,
        content_suffix: &str,
        client_id: &str,
        kind_id: &str,
    ) -> Result<Templates, TemplateError> {
        let subject = self.resolve(subject_suffix, client_id, kind_id).await?;
        let content = self.resolve(content_suffix, client_id, kind_id).await?;

        Ok(Templates {
            subject: subject.text,
            text: content.text,
            html: content.html,
        })
    }
}

const UNSUBSCRIBE_TEXT: &str = "{% if unsubscribe_link %}\n\nTo unsubscribe from these notifications, visit: {{ unsubscribe_link }}{% endif %}";
const UNSUBSCRIBE_HTML: &str = "{% if unsubscribe_link %}<p><a href=\"{{ unsubscribe_link }}\">Unsubscribe</a></p>{% endif %}";

fn body(endorsement_html_class: &str) -> Template {
    Template::new(
        format!("{{{{ endorsement }}}}\n\n{{{{ text }}}}{UNSUBSCRIBE_TEXT}"),
        format!(
            "<p class=\"{endorsement_html_class}\">{{{{ endorsement }}}}</p>{{{{ html }}}}{UNSUBSCRIBE_HTML}"
        ),
    )
}

/// Built-in templates for every suffix.
pub fn default_templates() -> Vec<(&'static str, Template)> {
    vec![
        (
            SUBJECT_PROVIDED,
            Template::new("CF Notification: {{ subject }}", ""),
        ),
        (
            SUBJECT_MISSING,
            Template::new("CF Notification: {{ kind_description }}", ""),
        ),
        (USER_BODY, body("user-endorsement")),
        (SPACE_BODY, body("space-endorsement")),
        (ORGANIZATION_BODY, body("organization-endorsement")),
        (UAA_SCOPE_BODY, body("scope-endorsement")),
        (EMAIL_BODY, body("email-endorsement")),
    ]
}

/// Write the built-in templates without overwriting customized ones.
pub async fn seed_defaults(store: &dyn TemplateStore) -> Result<usize, StoreError> {
    let mut seeded = 0;
    for (name, template) in default_templates() {
        if store.insert_if_absent(name, &template).await? {
            seeded += 1;
        }
    }
    Ok(seeded)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_loader() -> (Arc<InMemoryTemplateStore>, FallbackTemplateLoader) {
        let store = Arc::new(InMemoryTemplateStore::new());
        seed_defaults(store.as_ref()).await.unwrap();
        let loader = FallbackTemplateLoader::new(store.clone());
        (store, loader)
    }

    #[test]
    fn candidates_most_specific_first() {
        assert_eq!(
            FallbackTemplateLoader::candidates("space_body", "client", "kind"),
            vec!["client.kind.space_body", "client.space_body", "space_body"]
        );
        assert_eq!(
            FallbackTemplateLoader::candidates("space_body", "client", ""),
            vec!["client.space_body", "space_body"]
        );
    }

    #[tokio::test]
    async fn falls_back_to_defaults() {
        let (_, loader) = seeded_loader().await;
        let templates = loader
            .load_templates(SUBJECT_MISSING, SPACE_BODY, "client", "kind")
            .await
            .unwrap();

        assert_eq!(templates.subject, "CF Notification: {{ kind_description }}");
        assert!(templates.html.contains("space-endorsement"));
    }

    #[tokio::test]
    async fn client_then_kind_override() {
        let (store, loader) = seeded_loader().await;
        store
            .upsert("client.user_body", &Template::new("client text", "client html"))
            .await
            .unwrap();
        store
            .upsert("client.kind.user_body", &Template::new("kind text", "kind html"))
            .await
            .unwrap();

        let kind = loader
            .load_templates(SUBJECT_PROVIDED, USER_BODY, "client", "kind")
            .await
            .unwrap();
        assert_eq!(kind.text, "kind text");

        let client = loader
            .load_templates(SUBJECT_PROVIDED, USER_BODY, "client", "other-kind")
            .await
            .unwrap();
        assert_eq!(client.text, "client text");
    }

    #[tokio::test]
    async fn unseeded_store_fails() {
        let loader = FallbackTemplateLoader::new(Arc::new(InMemoryTemplateStore::new()));
        let err = loader
            .load_templates(SUBJECT_PROVIDED, EMAIL_BODY, "client", "kind")
            .await
            .unwrap_err();
        assert_eq!(err, TemplateError::NotFound(SUBJECT_PROVIDED.to_string()));
    }

    #[tokio::test]
    async fn seeding_keeps_customized_templates() {
        let store = InMemoryTemplateStore::new();
        store
            .upsert(EMAIL_BODY, &Template::new("custom", "custom"))
            .await
            .unwrap();

        let seeded = seed_defaults(&store).await.unwrap();
        assert_eq!(seeded, default_templates().len() - 1);
        assert_eq!(store.get(EMAIL_BODY).await.unwrap().unwrap().text, "custom");
    }
}
