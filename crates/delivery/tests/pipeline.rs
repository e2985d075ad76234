//! Dispatch through delivery over in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use herald_core::{Dispatch, DispatchClient, DispatchKind, DispatchMessage, MessageStatus, Response};
use herald_delivery::{MessageRenderer, WorkerPool, WorkerPoolConfig, WorkerPoolHandle};
use herald_dispatch::strategies::StrategyDeps;
use herald_dispatch::{Audience, QueueEnqueuer, Strategies};
use herald_infra::db::InMemoryMessageRepository;
use herald_infra::jobs::{InMemoryJobStore, JobQueue, QueueConfig, RetryPolicy};
use herald_infra::mail::{RecordingMailer, SendBehaviour};
use herald_infra::preferences::{InMemoryPreferences, UnsubscribeStore};
use herald_infra::providers::InMemoryDirectory;
use herald_infra::templates::{seed_defaults, FallbackTemplateLoader, InMemoryTemplateStore};

struct Pipeline {
    strategies: Strategies,
    messages: Arc<InMemoryMessageRepository>,
    jobs: Arc<InMemoryJobStore>,
    preferences: Arc<InMemoryPreferences>,
    mailer: RecordingMailer,
    pool: WorkerPool,
}

async fn pipeline(directory: InMemoryDirectory, config: QueueConfig) -> Pipeline {
    let directory = Arc::new(directory);
    let messages = InMemoryMessageRepository::arc();
    let jobs = InMemoryJobStore::arc();
    let preferences = Arc::new(InMemoryPreferences::new());
    let mailer = RecordingMailer::new();
    let templates = Arc::new(InMemoryTemplateStore::new());
    seed_defaults(templates.as_ref()).await.unwrap();

    let queue = JobQueue::new(
        jobs.clone(),
        QueueConfig {
            wait_min: Duration::from_millis(1),
            wait_max: Duration::from_millis(5),
            ..config
        },
    );

    let strategies = Strategies::new(StrategyDeps {
        tokens: directory.clone(),
        identity: directory.clone(),
        spaces: directory.clone(),
        organizations: directory.clone(),
        templates: Arc::new(FallbackTemplateLoader::new(templates)),
        enqueuer: Arc::new(QueueEnqueuer::new(messages.clone(), queue.clone())),
    });

    let pool = WorkerPool::new(
        queue,
        messages.clone(),
        preferences.clone(),
        MessageRenderer::new("no-reply@example.com", "https://notifications.example.com"),
        Arc::new(mailer.clone()),
    );

    Pipeline {
        strategies,
        messages,
        jobs,
        preferences,
        mailer,
        pool,
    }
}

fn dispatch(guid: &str) -> Dispatch {
    Dispatch::new(
        guid,
        DispatchClient {
            id: "mister-client".into(),
            description: "Mister Client".into(),
        },
        DispatchKind {
            id: "acceptance-test".into(),
            description: "Acceptance Test".into(),
            critical: false,
        },
    )
    .with_message(DispatchMessage {
        subject: "Hello".into(),
        text: "Deployment finished".into(),
        ..DispatchMessage::default()
    })
}

impl Pipeline {
    fn start(&self) -> WorkerPoolHandle {
        self.pool.spawn(WorkerPoolConfig::default().with_workers(2))
    }

    /// Wait until the queue is empty and every message left `queued`.
    async fn settle(&self, responses: &[Response]) {
        for _ in 0..300 {
            let settled = self.jobs.snapshot().is_empty()
                && responses.iter().all(|r| {
                    self.messages
                        .status_of(r.notification_id)
                        .is_some_and(|s| s.is_terminal())
                });
            if settled {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pipeline did not settle");
    }

    fn status(&self, response: &Response) -> Option<MessageStatus> {
        self.messages.status_of(response.notification_id)
    }
}

#[tokio::test]
async fn space_members_receive_one_mail_each() {
    let directory = InMemoryDirectory::new()
        .with_user("user-123", Some("user-123@example.com"))
        .with_user("user-456", Some("user-456@example.com"))
        .with_organization("org-001", "the-org")
        .with_space("space-001", "production", "org-001", &["user-123", "user-456"]);
    let p = pipeline(directory, QueueConfig::default()).await;

    let responses = p
        .strategies
        .dispatch(Audience::Space, &dispatch("space-001"))
        .await
        .unwrap();
    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(|r| r.status == MessageStatus::Queued));

    let handle = p.start();
    p.settle(&responses).await;
    handle.shutdown().await;

    let mut to: Vec<_> = p.mailer.sent().into_iter().map(|m| m.to).collect();
    to.sort();
    assert_eq!(to, vec!["user-123@example.com", "user-456@example.com"]);
    for response in &responses {
        assert_eq!(p.status(response), Some(MessageStatus::Delivered));
    }

    let mail = &p.mailer.sent()[0];
    assert_eq!(mail.subject, "CF Notification: Hello");
    assert!(mail.text.contains("production space in the the-org organization"));
    assert!(mail.text.contains("Deployment finished"));
}

#[tokio::test]
async fn malformed_address_fails_without_retry() {
    let p = pipeline(InMemoryDirectory::new(), QueueConfig::default()).await;

    let mut request = dispatch("");
    request.message.to = "not-an-address".into();
    let responses = p
        .strategies
        .dispatch(Audience::Email, &request)
        .await
        .unwrap();
    assert_eq!(responses.len(), 1);

    let handle = p.start();
    p.settle(&responses).await;
    let stats = handle.stats();
    handle.shutdown().await;

    assert_eq!(p.status(&responses[0]), Some(MessageStatus::Failed));
    assert!(p.mailer.sent().is_empty());
    assert_eq!(p.mailer.attempts(), 1);
    assert_eq!(stats.retried, 0);
}

#[tokio::test]
async fn unsubscribed_user_is_queued_but_never_mailed() {
    let directory = InMemoryDirectory::new().with_user("user-123", Some("user-123@example.com"));
    let p = pipeline(directory, QueueConfig::default()).await;
    p.preferences
        .set_unsubscribed("user-123", "mister-client", "acceptance-test", true)
        .await
        .unwrap();

    let responses = p
        .strategies
        .dispatch(Audience::User, &dispatch("user-123"))
        .await
        .unwrap();
    assert_eq!(responses[0].status, MessageStatus::Queued);

    let handle = p.start();
    p.settle(&responses).await;
    handle.shutdown().await;

    assert!(p.mailer.sent().is_empty());
    assert_eq!(p.status(&responses[0]), Some(MessageStatus::Unsubscribed));
}

#[tokio::test]
async fn transient_failures_exhaust_retries() {
    let directory = InMemoryDirectory::new().with_user("user-123", Some("user-123@example.com"));
    let p = pipeline(
        directory,
        QueueConfig {
            retry: RetryPolicy::fixed(2, Duration::ZERO),
            ..QueueConfig::default()
        },
    )
    .await;
    p.mailer.set_behaviour(SendBehaviour::FailTransient);

    let responses = p
        .strategies
        .dispatch(Audience::User, &dispatch("user-123"))
        .await
        .unwrap();

    let handle = p.start();
    p.settle(&responses).await;
    handle.shutdown().await;

    assert_eq!(p.mailer.attempts(), 3);
    assert_eq!(p.status(&responses[0]), Some(MessageStatus::Failed));
}

#[tokio::test]
async fn full_queue_admits_nothing_and_fails_stranded_messages() {
    let directory = InMemoryDirectory::new()
        .with_user("user-123", Some("user-123@example.com"))
        .with_user("user-456", Some("user-456@example.com"))
        .with_organization("org-001", "the-org")
        .with_space("space-001", "production", "org-001", &["user-123", "user-456"]);
    let p = pipeline(
        directory,
        QueueConfig {
            max_queue_length: 1,
            ..QueueConfig::default()
        },
    )
    .await;

    let responses = p
        .strategies
        .dispatch(Audience::Space, &dispatch("space-001"))
        .await
        .unwrap();

    assert!(responses.is_empty());
    let all = p.messages.all();
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|m| m.status == MessageStatus::Failed));
}
