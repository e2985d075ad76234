//! Postgres-backed job table.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers across processes
//! never lease the same row and never block on each other's locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use crate::db::{map_sqlx_error, StoreError};

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobId, NewJob};

impl From<StoreError> for JobStoreError {
    fn from(err: StoreError) -> Self {
        JobStoreError::Storage(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert(&self, job: NewJob) -> Result<JobId, JobStoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO jobs (payload, active_at, retry_count, created_at)
            VALUES ($1, NOW(), 0, NOW())
            RETURNING id
            "#,
        )
        .bind(&job.payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        Ok(JobId(id))
    }

    #[instrument(skip(self), err)]
    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET locked_by = $1, locked_at = $2
            WHERE id = (
                SELECT id FROM jobs
                WHERE locked_by IS NULL AND active_at <= $2
                ORDER BY active_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, active_at, retry_count, locked_by, locked_at, created_at
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_job", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn delete(&self, id: JobId) -> Result<bool, JobStoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_job", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn reschedule(
        &self,
        id: JobId,
        retry_count: u32,
        active_at: DateTime<Utc>,
    ) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET retry_count = $2, active_at = $3, locked_by = NULL, locked_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(retry_count as i32)
        .bind(active_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("reschedule_job", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(id));
        }
        Ok(())
    }

    async fn release_leases(&self) -> Result<u64, JobStoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET locked_by = NULL, locked_at = NULL WHERE locked_by IS NOT NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("release_leases", e))?;
        Ok(result.rows_affected())
    }

    async fn release_stale_leases(
        &self,
        locked_before: DateTime<Utc>,
    ) -> Result<u64, JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET locked_by = NULL, locked_at = NULL
            WHERE locked_by IS NOT NULL AND locked_at < $1
            "#,
        )
        .bind(locked_before)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("release_stale_leases", e))?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<u64, JobStoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_jobs", e))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        Ok(n.max(0) as u64)
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, JobStoreError> {
    let corrupt = |e: sqlx::Error| JobStoreError::Storage(format!("corrupt job row: {e}"));

    let retry_count: i32 = row.try_get("retry_count").map_err(corrupt)?;
    Ok(Job {
        id: JobId(row.try_get("id").map_err(corrupt)?),
        payload: row.try_get("payload").map_err(corrupt)?,
        active_at: row.try_get("active_at").map_err(corrupt)?,
        retry_count: retry_count.max(0) as u32,
        locked_by: row.try_get("locked_by").map_err(corrupt)?,
        locked_at: row.try_get("locked_at").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
    })
}
