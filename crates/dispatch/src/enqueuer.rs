//! Transactional admission: Messages first, then one job per recipient.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use herald_core::{Delivery, Message, MessageId, MessageStatus, Options, Response, User, DELIVERY_VERSION};
use herald_infra::db::{MessageRepository, MessageTransaction, StoreError};
use herald_infra::jobs::JobQueue;

/// Everything the enqueuer needs for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    pub users: Vec<User>,
    pub options: Options,
    pub space: String,
    pub organization: String,
    pub client_id: String,
    pub scope: String,
    pub vcap_request_id: String,
    pub request_received: DateTime<Utc>,
}

/// Admits recipients. Returns one `queued` response per recipient, or an empty
/// list when admission failed (failures are logged, not returned).
#[async_trait]
pub trait Enqueuer: Send + Sync {
    async fn enqueue(&self, request: EnqueueRequest) -> Vec<Response>;
}

#[async_trait]
impl<E: Enqueuer + ?Sized> Enqueuer for Arc<E> {
    async fn enqueue(&self, request: EnqueueRequest) -> Vec<Response> {
        (**self).enqueue(request).await
    }
}

/// Enqueuer over a message repository and the durable job queue.
pub struct QueueEnqueuer {
    messages: Arc<dyn MessageRepository>,
    queue: JobQueue,
}

impl QueueEnqueuer {
    pub fn new(messages: Arc<dyn MessageRepository>, queue: JobQueue) -> Self {
        Self { messages, queue }
    }

    async fn persist_messages(&self, messages: &[Message]) -> Result<(), StoreError> {
        let mut tx: Box<dyn MessageTransaction> = self.messages.begin().await?;

        for message in messages {
            if let Err(e) = tx.upsert(message).await {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                return Err(e);
            }
        }

        tx.commit().await
    }

    /// Mark messages whose job never made it into the queue as failed.
    async fn compensate(&self, deliveries: &[Delivery]) {
        for delivery in deliveries {
            if let Err(e) = self
                .messages
                .update_status(delivery.message_id, MessageStatus::Failed)
                .await
            {
                error!(message_id = %delivery.message_id, error = %e, "failed to mark unqueued message as failed");
            }
        }
    }
}

#[async_trait]
impl Enqueuer for QueueEnqueuer {
    #[instrument(skip_all, fields(client_id = %request.client_id, recipients = request.users.len()))]
    async fn enqueue(&self, request: EnqueueRequest) -> Vec<Response> {
        let mut deliveries = Vec::with_capacity(request.users.len());
        let mut responses = Vec::with_capacity(request.users.len());
        let mut messages = Vec::with_capacity(request.users.len());

        for user in &request.users {
            let message_id = MessageId::new();
            let email = user.email.clone().unwrap_or_default();

            deliveries.push(Delivery {
                version: DELIVERY_VERSION,
                message_id,
                client_id: request.client_id.clone(),
                options: request.options.clone(),
                user_guid: user.guid.clone().unwrap_or_default(),
                email: email.clone(),
                space: request.space.clone(),
                organization: request.organization.clone(),
                scope: request.scope.clone(),
                vcap_request_id: request.vcap_request_id.clone(),
                request_received: request.request_received,
            });
            responses.push(Response::queued(
                user.recipient(),
                message_id,
                email,
                request.vcap_request_id.clone(),
            ));
            messages.push(Message::queued(message_id, request.client_id.clone()));
        }

        if let Err(e) = self.persist_messages(&messages).await {
            error!(error = %e, "message transaction failed, nothing admitted");
            return Vec::new();
        }

        for (index, delivery) in deliveries.iter().enumerate() {
            if let Err(e) = self.queue.enqueue(delivery).await {
                error!(
                    message_id = %delivery.message_id,
                    error = %e,
                    "job enqueue failed after commit"
                );
                self.compensate(&deliveries[index..]).await;
                return Vec::new();
            }
        }

        info!(count = responses.len(), "dispatch admitted");
        responses
    }
}
