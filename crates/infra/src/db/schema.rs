//! Idempotent schema bootstrap.

use sqlx::PgPool;
use tracing::instrument;

use super::{map_sqlx_error, StoreError};

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id UUID PRIMARY KEY,
        status TEXT NOT NULL,
        client_id TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id BIGSERIAL PRIMARY KEY,
        payload TEXT NOT NULL,
        active_at TIMESTAMPTZ NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        locked_by TEXT,
        locked_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS jobs_ready_idx ON jobs (active_at, id) WHERE locked_by IS NULL",
    r#"
    CREATE TABLE IF NOT EXISTS templates (
        name TEXT PRIMARY KEY,
        text TEXT NOT NULL,
        html TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS unsubscribes (
        user_id TEXT NOT NULL,
        client_id TEXT NOT NULL,
        kind_id TEXT NOT NULL,
        PRIMARY KEY (user_id, client_id, kind_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS global_unsubscribes (
        user_id TEXT PRIMARY KEY
    )
    "#,
];

/// Create every table the pipeline needs if it does not exist yet.
#[instrument(skip_all, err)]
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    }
    Ok(())
}
