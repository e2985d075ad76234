//! Message persistence behind a begin/commit/rollback abstraction.
//!
//! The enqueuer writes every `Message` of a dispatch inside one transaction so a
//! failed admission leaves no trace. Workers update status outside transactions;
//! each update touches exactly one row.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use herald_core::{DomainError, Message, MessageId, MessageStatus};

use super::{map_sqlx_error, StoreError};

/// An open write transaction over the messages table.
#[async_trait]
pub trait MessageTransaction: Send {
    /// Insert the message, or overwrite status/client of an existing row.
    async fn upsert(&mut self, message: &Message) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Message store.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn MessageTransaction>, StoreError>;

    async fn find(&self, id: MessageId) -> Result<Option<Message>, StoreError>;

    /// Set the status of one message. Missing rows are `StoreError::NotFound`.
    async fn update_status(&self, id: MessageId, status: MessageStatus) -> Result<(), StoreError>;
}

#[async_trait]
impl<R> MessageRepository for Arc<R>
where
    R: MessageRepository + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn MessageTransaction>, StoreError> {
        (**self).begin().await
    }

    async fn find(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        (**self).find(id).await
    }

    async fn update_status(&self, id: MessageId, status: MessageStatus) -> Result<(), StoreError> {
        (**self).update_status(id, status).await
    }
}

// In-memory implementation

type MessageMap = Arc<Mutex<HashMap<MessageId, Message>>>;

/// In-memory message store for tests/dev.
///
/// Writes are staged per transaction and only become visible on commit.
#[derive(Debug, Default)]
pub struct InMemoryMessageRepository {
    messages: MessageMap,
    fail_commits: Arc<AtomicBool>,
    fail_status_updates: Arc<AtomicBool>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make every subsequent commit fail (rollback-path tests).
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `update_status` fail with a storage error.
    pub fn fail_status_updates(&self, fail: bool) {
        self.fail_status_updates.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of all committed messages.
    pub fn all(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn status_of(&self, id: MessageId) -> Option<MessageStatus> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|m| m.status)
    }
}

struct InMemoryMessageTransaction {
    staged: Vec<Message>,
    target: MessageMap,
    fail_commit: bool,
}

#[async_trait]
impl MessageTransaction for InMemoryMessageTransaction {
    async fn upsert(&mut self, message: &Message) -> Result<(), StoreError> {
        self.staged.retain(|m| m.id != message.id);
        self.staged.push(message.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        if this.fail_commit {
            return Err(StoreError::storage("commit rejected"));
        }
        let mut messages = this.target.lock().unwrap_or_else(PoisonError::into_inner);
        for message in this.staged {
            messages.insert(message.id, message);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn begin(&self) -> Result<Box<dyn MessageTransaction>, StoreError> {
        Ok(Box::new(InMemoryMessageTransaction {
            staged: Vec::new(),
            target: self.messages.clone(),
            fail_commit: self.fail_commits.load(Ordering::SeqCst),
        }))
    }

    async fn find(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        Ok(self
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned())
    }

    async fn update_status(&self, id: MessageId, status: MessageStatus) -> Result<(), StoreError> {
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(StoreError::storage("status update failed"));
        }
        let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        let message = messages
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("message {id}")))?;
        message.status = status;
        message.updated_at = Utc::now();
        Ok(())
    }
}

// Postgres implementation

/// Postgres-backed message store.
#[derive(Debug, Clone)]
pub struct PostgresMessageRepository {
    pool: PgPool,
}

impl PostgresMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PostgresMessageTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl MessageTransaction for PostgresMessageTransaction {
    async fn upsert(&mut self, message: &Message) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, status, client_id, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id)
            DO UPDATE SET
                status = EXCLUDED.status,
                client_id = EXCLUDED.client_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(message.id.as_uuid())
        .bind(message.status.as_str())
        .bind(&message.client_id)
        .bind(message.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_message", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[async_trait]
impl MessageRepository for PostgresMessageRepository {
    async fn begin(&self) -> Result<Box<dyn MessageTransaction>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresMessageTransaction { tx }))
    }

    #[instrument(skip(self), fields(message_id = %id), err)]
    async fn find(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query("SELECT id, status, client_id, updated_at FROM messages WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_message", e))?;

        row.as_ref().map(message_from_row).transpose()
    }

    #[instrument(skip(self), fields(message_id = %id, status = %status), err)]
    async fn update_status(&self, id: MessageId, status: MessageStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE messages SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_message_status", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("message {id}")));
        }
        Ok(())
    }
}

fn message_from_row(row: &PgRow) -> Result<Message, StoreError> {
    let corrupt = |e: sqlx::Error| StoreError::Corrupt(e.to_string());

    let id: Uuid = row.try_get("id").map_err(corrupt)?;
    let status: String = row.try_get("status").map_err(corrupt)?;
    let client_id: String = row.try_get("client_id").map_err(corrupt)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(corrupt)?;

    Ok(Message {
        id: MessageId::from_uuid(id),
        status: status
            .parse()
            .map_err(|e: DomainError| StoreError::Corrupt(e.to_string()))?,
        client_id,
        updated_at,
    })
}
