//! Worker pool: N delivery workers over one queue, stopped together.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use herald_infra::db::MessageRepository;
use herald_infra::jobs::JobQueue;
use herald_infra::mail::MailerFactory;
use herald_infra::preferences::UnsubscribeStore;

use crate::render::MessageRenderer;
use crate::worker::DeliveryWorker;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    /// Prefix for worker ids; ids are `{name}-{instance}-{n}`.
    pub name: String,
    pub instance_index: u32,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            name: "delivery".to_string(),
            instance_index: 0,
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_instance(mut self, instance_index: u32) -> Self {
        self.instance_index = instance_index;
        self
    }

    fn worker_id(&self, n: usize) -> String {
        format!("{}-{}-{}", self.name, self.instance_index, n)
    }
}

/// Pool runtime counters, shared by every worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub jobs_processed: u64,
    pub delivered: u64,
    pub unsubscribed: u64,
    pub undeliverable: u64,
    pub retried: u64,
    pub failed: u64,
    pub discarded: u64,
    pub workers: usize,
    pub uptime_secs: u64,
}

/// Dependencies every worker gets a handle to.
#[derive(Clone)]
pub struct WorkerPool {
    queue: JobQueue,
    messages: Arc<dyn MessageRepository>,
    preferences: Arc<dyn UnsubscribeStore>,
    renderer: MessageRenderer,
    mailers: Arc<dyn MailerFactory>,
}

impl WorkerPool {
    pub fn new(
        queue: JobQueue,
        messages: Arc<dyn MessageRepository>,
        preferences: Arc<dyn UnsubscribeStore>,
        renderer: MessageRenderer,
        mailers: Arc<dyn MailerFactory>,
    ) -> Self {
        Self {
            queue,
            messages,
            preferences,
            renderer,
            mailers,
        }
    }

    /// Spawn `config.workers` tasks, each with its own mailer connection.
    pub fn spawn(&self, config: WorkerPoolConfig) -> WorkerPoolHandle {
        let (stop, stop_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(PoolStats {
            workers: config.workers,
            ..PoolStats::default()
        }));

        let mut joins: Vec<_> = (0..config.workers)
            .map(|n| {
                let worker = DeliveryWorker::new(
                    config.worker_id(n),
                    self.queue.clone(),
                    self.messages.clone(),
                    self.preferences.clone(),
                    self.renderer.clone(),
                    self.mailers.create(),
                )
                .with_stats(stats.clone());
                tokio::spawn(worker.run(stop_rx.clone()))
            })
            .collect();
        joins.push(tokio::spawn(self.queue.clone().sweep_expired(stop_rx)));

        info!(workers = config.workers, pool = %config.name, "delivery pool started");

        WorkerPoolHandle {
            stop,
            joins,
            stats,
            started: Instant::now(),
        }
    }
}

/// Handle to a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    stop: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<PoolStats>>,
    started: Instant,
}

impl WorkerPoolHandle {
    /// Signal every worker and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for join in self.joins {
            if let Err(e) = join.await {
                warn!(error = %e, "delivery worker panicked");
            }
        }
        info!("delivery pool stopped");
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use herald_core::{Delivery, MessageId, Options, Templates, DELIVERY_VERSION};
    use herald_infra::db::InMemoryMessageRepository;
    use herald_infra::jobs::{InMemoryJobStore, QueueConfig};
    use herald_infra::mail::RecordingMailer;
    use herald_infra::preferences::InMemoryPreferences;

    fn delivery(n: usize) -> Delivery {
        Delivery {
            version: DELIVERY_VERSION,
            message_id: MessageId::new(),
            client_id: "client".into(),
            options: Options {
                kind_id: "kind".into(),
                templates: Templates {
                    subject: "subject {{ message_id }}".into(),
                    text: "text".into(),
                    html: String::new(),
                },
                ..Options::default()
            },
            user_guid: format!("user-{n}"),
            email: format!("user-{n}@example.com"),
            space: String::new(),
            organization: String::new(),
            scope: String::new(),
            vcap_request_id: String::new(),
            request_received: Utc::now(),
        }
    }

    #[test]
    fn worker_ids_are_unique_per_instance() {
        let config = WorkerPoolConfig::default().with_instance(2);
        assert_eq!(config.worker_id(0), "delivery-2-0");
        assert_ne!(config.worker_id(0), config.worker_id(1));
    }

    #[tokio::test]
    async fn pool_drains_queue_once_per_job() {
        let jobs = InMemoryJobStore::arc();
        let queue = JobQueue::new(
            jobs.clone(),
            QueueConfig {
                wait_min: Duration::from_millis(1),
                wait_max: Duration::from_millis(5),
                ..QueueConfig::default()
            },
        );
        for n in 0..20 {
            queue.enqueue(&delivery(n)).await.unwrap();
        }

        let mailer = RecordingMailer::new();
        let pool = WorkerPool::new(
            queue,
            InMemoryMessageRepository::arc(),
            Arc::new(InMemoryPreferences::new()),
            MessageRenderer::new("no-reply@example.com", "https://notify.example.com"),
            Arc::new(mailer.clone()),
        );
        let handle = pool.spawn(WorkerPoolConfig::default().with_workers(4));

        for _ in 0..200 {
            if handle.stats().jobs_processed == 20 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stats = handle.stats();
        handle.shutdown().await;

        let mut recipients: Vec<_> = mailer.sent().into_iter().map(|m| m.to).collect();
        recipients.sort();
        recipients.dedup();
        assert_eq!(recipients.len(), 20);
        assert_eq!(mailer.sent().len(), 20);
        assert_eq!(mailer.connects(), 4);
        assert_eq!(stats.workers, 4);
        assert_eq!(stats.jobs_processed, 20);
    }

    #[tokio::test]
    async fn abandoned_lease_is_picked_up_by_the_pool() {
        let jobs = InMemoryJobStore::arc();
        let queue = JobQueue::new(
            jobs.clone(),
            QueueConfig {
                wait_min: Duration::from_millis(1),
                wait_max: Duration::from_millis(5),
                lease_timeout: Duration::from_millis(50),
                ..QueueConfig::default()
            },
        );
        queue.enqueue(&delivery(0)).await.unwrap();
        queue.try_reserve("gone").await.unwrap().unwrap();

        let mailer = RecordingMailer::new();
        let pool = WorkerPool::new(
            queue,
            InMemoryMessageRepository::arc(),
            Arc::new(InMemoryPreferences::new()),
            MessageRenderer::new("no-reply@example.com", ""),
            Arc::new(mailer.clone()),
        );
        let handle = pool.spawn(WorkerPoolConfig::default().with_workers(1));

        for _ in 0..300 {
            if jobs.snapshot().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert!(jobs.snapshot().is_empty());
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_with_empty_queue_returns() {
        let pool = WorkerPool::new(
            JobQueue::new(InMemoryJobStore::arc(), QueueConfig::default()),
            InMemoryMessageRepository::arc(),
            Arc::new(InMemoryPreferences::new()),
            MessageRenderer::new("no-reply@example.com", ""),
            Arc::new(RecordingMailer::new()),
        );
        let handle = pool.spawn(WorkerPoolConfig::default().with_workers(2));
        tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .unwrap();
    }
}
