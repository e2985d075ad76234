//! Job storage implementations.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::{Job, JobId, NewJob};

/// Durable job table abstraction.
///
/// Implementations must make `claim_next` atomic: two concurrent callers never
/// receive the same job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Admit a job, ready immediately with `retry_count = 0`.
    async fn insert(&self, job: NewJob) -> Result<JobId, JobStoreError>;

    /// Lease the oldest unlocked job whose `active_at` has passed.
    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError>;

    /// Remove a job. Returns `false` when it was already gone.
    async fn delete(&self, id: JobId) -> Result<bool, JobStoreError>;

    /// Clear the lease and schedule the job for another attempt.
    async fn reschedule(
        &self,
        id: JobId,
        retry_count: u32,
        active_at: DateTime<Utc>,
    ) -> Result<(), JobStoreError>;

    /// Clear every lease. Returns the number of jobs released.
    async fn release_leases(&self) -> Result<u64, JobStoreError>;

    /// Clear leases taken before `locked_before`.
    async fn release_stale_leases(
        &self,
        locked_before: DateTime<Utc>,
    ) -> Result<u64, JobStoreError>;

    /// Number of jobs in the table, leased or not.
    async fn count(&self) -> Result<u64, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    async fn insert(&self, job: NewJob) -> Result<JobId, JobStoreError> {
        (**self).insert(job).await
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next(worker_id, now).await
    }

    async fn delete(&self, id: JobId) -> Result<bool, JobStoreError> {
        (**self).delete(id).await
    }

    async fn reschedule(
        &self,
        id: JobId,
        retry_count: u32,
        active_at: DateTime<Utc>,
    ) -> Result<(), JobStoreError> {
        (**self).reschedule(id, retry_count, active_at).await
    }

    async fn release_leases(&self) -> Result<u64, JobStoreError> {
        (**self).release_leases().await
    }

    async fn release_stale_leases(
        &self,
        locked_before: DateTime<Utc>,
    ) -> Result<u64, JobStoreError> {
        (**self).release_stale_leases(locked_before).await
    }

    async fn count(&self) -> Result<u64, JobStoreError> {
        (**self).count().await
    }
}

#[derive(Debug, Default)]
struct Table {
    next_id: i64,
    jobs: BTreeMap<JobId, Job>,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    table: Mutex<Table>,
    fail_inserts: Mutex<bool>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make every subsequent insert fail with a storage error.
    pub fn fail_inserts(&self, fail: bool) {
        *self.fail_inserts.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    /// Snapshot of all jobs, ordered by id.
    pub fn snapshot(&self) -> Vec<Job> {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .jobs
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .jobs
            .get(&id)
            .cloned()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: NewJob) -> Result<JobId, JobStoreError> {
        if *self.fail_inserts.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(JobStoreError::Storage("insert rejected".to_string()));
        }

        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.next_id += 1;
        let id = JobId(table.next_id);
        let now = Utc::now();
        table.jobs.insert(
            id,
            Job {
                id,
                payload: job.payload,
                active_at: now,
                retry_count: 0,
                locked_by: None,
                locked_at: None,
                created_at: now,
            },
        );
        Ok(id)
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);

        let next = table
            .jobs
            .values()
            .filter(|j| j.is_ready(now))
            .min_by_key(|j| (j.active_at, j.id))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            table.jobs.get_mut(&id).map(|job| {
                job.locked_by = Some(worker_id.to_string());
                job.locked_at = Some(now);
                job.clone()
            })
        }))
    }

    async fn delete(&self, id: JobId) -> Result<bool, JobStoreError> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(table.jobs.remove(&id).is_some())
    }

    async fn reschedule(
        &self,
        id: JobId,
        retry_count: u32,
        active_at: DateTime<Utc>,
    ) -> Result<(), JobStoreError> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let job = table.jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        job.retry_count = retry_count;
        job.active_at = active_at;
        job.locked_by = None;
        job.locked_at = None;
        Ok(())
    }

    async fn release_leases(&self) -> Result<u64, JobStoreError> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let mut released = 0;
        for job in table.jobs.values_mut() {
            job.locked_at = None;
            if job.locked_by.take().is_some() {
                released += 1;
            }
        }
        Ok(released)
    }

    async fn release_stale_leases(
        &self,
        locked_before: DateTime<Utc>,
    ) -> Result<u64, JobStoreError> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let mut released = 0;
        for job in table.jobs.values_mut() {
            if job.locked_at.is_some_and(|at| at < locked_before) {
                job.locked_by = None;
                job.locked_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn count(&self) -> Result<u64, JobStoreError> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(table.jobs.len() as u64)
    }
}
