//! A single delivery worker.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use herald_core::{Delivery, MessageStatus};
use herald_infra::db::{MessageRepository, StoreError};
use herald_infra::jobs::{Job, JobQueue, QueueError};
use herald_infra::mail::{MailError, Mailer};
use herald_infra::preferences::UnsubscribeStore;

use crate::pool::PoolStats;
use crate::render::MessageRenderer;

/// What happened to one reserved job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Delivered,
    Unsubscribed,
    Undeliverable,
    /// Requeued for another attempt.
    Retrying { retry_count: u32 },
    Failed,
    /// Payload could not be decoded; the job was dropped.
    Discarded,
    /// The status could not be recorded; the job was released for another
    /// pass without spending a retry.
    Deferred,
    /// Requeue or release failed; the lease stays until it expires.
    Abandoned,
}

impl Outcome {
    fn status(&self) -> Option<MessageStatus> {
        match self {
            Outcome::Delivered => Some(MessageStatus::Delivered),
            Outcome::Unsubscribed => Some(MessageStatus::Unsubscribed),
            Outcome::Undeliverable => Some(MessageStatus::Undeliverable),
            Outcome::Failed => Some(MessageStatus::Failed),
            Outcome::Retrying { .. }
            | Outcome::Deferred
            | Outcome::Discarded
            | Outcome::Abandoned => None,
        }
    }
}

pub struct DeliveryWorker {
    id: String,
    queue: JobQueue,
    messages: Arc<dyn MessageRepository>,
    preferences: Arc<dyn UnsubscribeStore>,
    renderer: MessageRenderer,
    mailer: Box<dyn Mailer>,
    stats: Arc<Mutex<PoolStats>>,
}

impl DeliveryWorker {
    pub fn new(
        id: impl Into<String>,
        queue: JobQueue,
        messages: Arc<dyn MessageRepository>,
        preferences: Arc<dyn UnsubscribeStore>,
        renderer: MessageRenderer,
        mailer: Box<dyn Mailer>,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            messages,
            preferences,
            renderer,
            mailer,
            stats: Arc::new(Mutex::new(PoolStats::default())),
        }
    }

    pub(crate) fn with_stats(mut self, stats: Arc<Mutex<PoolStats>>) -> Self {
        self.stats = stats;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Drain the queue until `stop` turns true.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!(worker = %self.id, "delivery worker started");
        if let Err(e) = self.mailer.connect().await {
            warn!(worker = %self.id, error = %e, "mail transport not reachable yet");
        }

        while let Some(job) = self.queue.reserve(&self.id, &mut stop).await {
            let outcome = self.process(&job).await;
            self.record(outcome);
        }

        info!(worker = %self.id, "delivery worker stopped");
    }

    /// Handle one reserved job to completion or requeue.
    #[instrument(skip_all, fields(worker = %self.id, job_id = %job.id, retry_count = job.retry_count))]
    pub async fn process(&mut self, job: &Job) -> Outcome {
        let delivery: Delivery = match job.decode() {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(error = %e, "dropping job with unreadable payload");
                self.dequeue(job).await;
                return Outcome::Discarded;
            }
        };

        let outcome = self.deliver(job, &delivery).await;
        let Some(status) = outcome.status() else {
            return outcome;
        };
        match self.finish(job, &delivery, status).await {
            Ok(()) => outcome,
            Err(e) => {
                error!(message_id = %delivery.message_id, %status, error = %e, "failed to record status");
                self.release(job).await
            }
        }
    }

    async fn deliver(&mut self, job: &Job, delivery: &Delivery) -> Outcome {
        let mail = match self.renderer.render(delivery) {
            Ok(mail) => mail,
            Err(e) => {
                error!(message_id = %delivery.message_id, error = %e, "render failed");
                return Outcome::Failed;
            }
        };

        if self.is_unsubscribed(delivery).await {
            debug!(message_id = %delivery.message_id, "recipient unsubscribed");
            return Outcome::Unsubscribed;
        }

        if delivery.email.is_empty() {
            warn!(message_id = %delivery.message_id, user = %delivery.user_guid, "no email address on record");
            return Outcome::Undeliverable;
        }

        match self.mailer.send(&mail).await {
            Ok(()) => {
                info!(message_id = %delivery.message_id, "delivered");
                Outcome::Delivered
            }
            Err(MailError::Permanent(reason)) => {
                warn!(message_id = %delivery.message_id, %reason, "permanent send failure");
                Outcome::Failed
            }
            Err(MailError::Transient(reason)) => self.retry(job, delivery, &reason).await,
        }
    }

    async fn retry(&self, job: &Job, delivery: &Delivery, reason: &str) -> Outcome {
        match self.queue.requeue(job).await {
            Ok(active_at) => {
                warn!(message_id = %delivery.message_id, %reason, %active_at, "transient send failure, requeued");
                Outcome::Retrying {
                    retry_count: job.retry_count + 1,
                }
            }
            Err(QueueError::RetriesExhausted(_)) => {
                warn!(
                    message_id = %delivery.message_id,
                    %reason,
                    ceiling = self.queue.retry_ceiling(),
                    "retries exhausted"
                );
                Outcome::Failed
            }
            Err(e) => {
                error!(message_id = %delivery.message_id, error = %e, "requeue failed");
                Outcome::Abandoned
            }
        }
    }

    /// Critical kinds and raw-email recipients bypass preferences.
    async fn is_unsubscribed(&self, delivery: &Delivery) -> bool {
        if delivery.options.critical || !delivery.has_user() {
            return false;
        }

        let user = &delivery.user_guid;
        let global = self.preferences.is_globally_unsubscribed(user).await;
        let per_kind = self
            .preferences
            .is_unsubscribed(user, &delivery.client_id, &delivery.options.kind_id)
            .await;

        match (global, per_kind) {
            (Ok(global), Ok(per_kind)) => global || per_kind,
            (Err(e), _) | (_, Err(e)) => {
                warn!(user = %user, error = %e, "preference lookup failed, sending anyway");
                false
            }
        }
    }

    /// Record the final status, then drop the job. The job stays queued if
    /// the status write fails.
    async fn finish(
        &self,
        job: &Job,
        delivery: &Delivery,
        status: MessageStatus,
    ) -> Result<(), StoreError> {
        self.messages
            .update_status(delivery.message_id, status)
            .await?;
        self.dequeue(job).await;
        Ok(())
    }

    async fn release(&self, job: &Job) -> Outcome {
        match self.queue.release(job).await {
            Ok(active_at) => {
                warn!(%active_at, "job released for another pass");
                Outcome::Deferred
            }
            Err(e) => {
                error!(error = %e, "release failed");
                Outcome::Abandoned
            }
        }
    }

    async fn dequeue(&self, job: &Job) {
        if let Err(e) = self.queue.dequeue(job).await {
            error!(job_id = %job.id, error = %e, "failed to dequeue job");
        }
    }

    fn record(&self, outcome: Outcome) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.jobs_processed += 1;
        match outcome {
            Outcome::Delivered => stats.delivered += 1,
            Outcome::Unsubscribed => stats.unsubscribed += 1,
            Outcome::Undeliverable => stats.undeliverable += 1,
            Outcome::Retrying { .. } | Outcome::Deferred => stats.retried += 1,
            Outcome::Failed => stats.failed += 1,
            Outcome::Discarded | Outcome::Abandoned => stats.discarded += 1,
        }
    }
}
