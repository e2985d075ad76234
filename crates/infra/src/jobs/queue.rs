//! Queue engine over a `JobStore`: admission, leased reserve, dequeue, requeue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobId, NewJob, RetryPolicy};

/// Queue configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Admission limit; `0` disables the check
    pub max_queue_length: u64,
    /// First poll backoff after a miss
    pub wait_min: Duration,
    /// Ceiling for the poll backoff of an idle worker
    pub wait_max: Duration,
    /// Leases older than this are released by the sweeper; zero disables it
    pub lease_timeout: Duration,
    /// Requeue schedule and retry ceiling
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_length: 10_000,
            wait_min: Duration::from_millis(50),
            wait_max: Duration::from_secs(5),
            lease_timeout: Duration::from_secs(15 * 60),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("queue is full (limit {limit})")]
    Full { limit: u64 },
    #[error("retry ceiling reached for job {0}")]
    RetriesExhausted(JobId),
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error("failed to encode payload: {0}")]
    Encode(String),
    #[error("failed to decode payload: {0}")]
    Decode(String),
}

/// Shared handle to the durable queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    config: QueueConfig,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Admit a payload as a new job, ready immediately.
    pub async fn enqueue<T: Serialize>(&self, payload: &T) -> Result<JobId, QueueError> {
        let job = NewJob::encode(payload)?;

        let limit = self.config.max_queue_length;
        if limit > 0 && self.store.count().await? >= limit {
            warn!(limit, "queue full, rejecting job");
            return Err(QueueError::Full { limit });
        }

        let id = self.store.insert(job).await?;
        debug!(job_id = %id, "job enqueued");
        Ok(id)
    }

    /// Single claim attempt.
    pub async fn try_reserve(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        Ok(self.store.claim_next(worker_id, Utc::now()).await?)
    }

    /// Poll until a job is leased to `worker_id` or `stop` turns true.
    ///
    /// Misses back off from `wait_min`, doubling up to `wait_max`, each sleep
    /// jittered so idle workers do not poll in lockstep.
    pub async fn reserve(&self, worker_id: &str, stop: &mut watch::Receiver<bool>) -> Option<Job> {
        let mut wait = self.config.wait_min;

        loop {
            if *stop.borrow() {
                return None;
            }

            match self.try_reserve(worker_id).await {
                Ok(Some(job)) => {
                    debug!(worker = worker_id, job_id = %job.id, retry_count = job.retry_count, "job reserved");
                    return Some(job);
                }
                Ok(None) => {}
                Err(e) => warn!(worker = worker_id, error = %e, "failed to reserve job"),
            }

            tokio::select! {
                _ = tokio::time::sleep(jittered(wait)) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return None;
                    }
                }
            }

            wait = wait.saturating_mul(2).min(self.config.wait_max.max(self.config.wait_min));
        }
    }

    /// Delete a job. Deleting an absent job is a no-op.
    pub async fn dequeue(&self, job: &Job) -> Result<(), QueueError> {
        if !self.store.delete(job.id).await? {
            debug!(job_id = %job.id, "dequeue of absent job ignored");
        }
        Ok(())
    }

    /// Whether a job that has been requeued `retry_count` times may be requeued again.
    pub fn can_retry(&self, retry_count: u32) -> bool {
        self.config.retry.should_retry(retry_count)
    }

    pub fn retry_ceiling(&self) -> u32 {
        self.config.retry.max_attempts
    }

    /// Release the lease and schedule another attempt with backoff.
    ///
    /// Returns the time the job becomes active again. Past the retry ceiling
    /// this fails with `RetriesExhausted` and the caller must dequeue.
    pub async fn requeue(&self, job: &Job) -> Result<DateTime<Utc>, QueueError> {
        if !self.can_retry(job.retry_count) {
            return Err(QueueError::RetriesExhausted(job.id));
        }

        let retry_count = job.retry_count + 1;
        let delay = self.config.retry.delay_for_attempt(retry_count);
        let active_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();

        self.store.reschedule(job.id, retry_count, active_at).await?;
        debug!(job_id = %job.id, retry_count, %active_at, "job requeued");
        Ok(active_at)
    }

    /// Release the lease without spending a retry.
    ///
    /// For jobs whose outcome could not be recorded. The job becomes active
    /// again after `wait_max`.
    pub async fn release(&self, job: &Job) -> Result<DateTime<Utc>, QueueError> {
        let active_at =
            Utc::now() + chrono::Duration::from_std(self.config.wait_max).unwrap_or_default();
        self.store
            .reschedule(job.id, job.retry_count, active_at)
            .await?;
        debug!(job_id = %job.id, retry_count = job.retry_count, %active_at, "job released");
        Ok(active_at)
    }

    /// Clear leases older than `lease_timeout`.
    pub async fn release_expired(&self) -> Result<u64, QueueError> {
        let timeout = chrono::Duration::from_std(self.config.lease_timeout).unwrap_or_default();
        let released = self.store.release_stale_leases(Utc::now() - timeout).await?;
        if released > 0 {
            warn!(released, "released expired job leases");
        }
        Ok(released)
    }

    /// Periodically release expired leases until `stop` turns true.
    ///
    /// Runs every quarter of `lease_timeout`, at least once a second.
    pub async fn sweep_expired(self, mut stop: watch::Receiver<bool>) {
        if self.config.lease_timeout.is_zero() {
            return;
        }
        let period = (self.config.lease_timeout / 4).max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.release_expired().await {
                        warn!(error = %e, "failed to release expired leases");
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Clear leases orphaned by a crashed process.
    pub async fn unlock(&self) -> Result<u64, QueueError> {
        let released = self.store.release_leases().await?;
        info!(released, "released orphaned job leases");
        Ok(released)
    }

    pub async fn len(&self) -> Result<u64, QueueError> {
        Ok(self.store.count().await?)
    }
}

fn jittered(wait: Duration) -> Duration {
    let ms = wait.as_millis().min(u64::MAX as u128) as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    let mut rng = rand::rng();
    Duration::from_millis(rng.random_range(ms / 2..=ms))
}
