//! Per-recipient message record.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::MessageId;

/// Delivery state of a message.
///
/// `Queued` is the only non-terminal state; workers move a message to exactly one
/// of the terminal states and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Admitted and waiting for (or between) delivery attempts
    Queued,
    /// Accepted by the mail transport
    Delivered,
    /// Permanent failure or retries exhausted
    Failed,
    /// Recipient opted out of a non-critical kind; nothing was sent
    Unsubscribed,
    /// Recipient has no email address on record
    Undeliverable,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Failed => "failed",
            MessageStatus::Unsubscribed => "unsubscribed",
            MessageStatus::Undeliverable => "undeliverable",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageStatus::Queued)
    }
}

impl core::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(MessageStatus::Queued),
            "delivered" => Ok(MessageStatus::Delivered),
            "failed" => Ok(MessageStatus::Failed),
            "unsubscribed" => Ok(MessageStatus::Unsubscribed),
            "undeliverable" => Ok(MessageStatus::Undeliverable),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// One message per recipient per dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub status: MessageStatus,
    pub client_id: String,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// A freshly admitted message.
    pub fn queued(id: MessageId, client_id: impl Into<String>) -> Self {
        Self {
            id,
            status: MessageStatus::Queued,
            client_id: client_id.into(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self.updated_at = Utc::now();
        self
    }
}
