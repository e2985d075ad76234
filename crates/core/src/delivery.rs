//! Job payload handed from the enqueuer to delivery workers.
//!
//! A `Delivery` is fully self-contained: everything needed to render and send
//! the message travels inside the job row. The JSON form is the job wire
//! format, so every field except the identifiers defaults when absent. A worker
//! built from a newer revision can still decode jobs enqueued by an older one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::MessageId;

/// Current payload revision written by the enqueuer.
pub const DELIVERY_VERSION: u32 = 1;

/// Caller-supplied HTML fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Html {
    pub body_content: String,
    pub body_attributes: String,
    pub head: String,
    pub doctype: String,
}

impl Html {
    pub fn is_empty(&self) -> bool {
        self.body_content.is_empty()
    }
}

/// Resolved subject/text/html template sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Templates {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Per-dispatch rendering options shared by every recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub reply_to: String,
    pub subject: String,
    pub kind_description: String,
    pub source_description: String,
    pub text: String,
    pub html: Html,
    pub kind_id: String,
    pub to: String,
    pub role: String,
    pub endorsement: String,
    pub templates: Templates,
    pub critical: bool,
}

/// A resolved recipient. At least one of `guid` and `email` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub guid: Option<String>,
    pub email: Option<String>,
}

impl User {
    pub fn with_guid(guid: impl Into<String>) -> Self {
        Self {
            guid: Some(guid.into()),
            email: None,
        }
    }

    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            guid: None,
            email: Some(email.into()),
        }
    }

    pub fn email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    /// Identifier echoed back in the dispatch response.
    pub fn recipient(&self) -> &str {
        self.guid
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or_default()
    }
}

fn default_version() -> u32 {
    DELIVERY_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    #[serde(default = "default_version")]
    pub version: u32,
    pub message_id: MessageId,
    pub client_id: String,
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub user_guid: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub space: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub vcap_request_id: String,
    #[serde(default)]
    pub request_received: DateTime<Utc>,
}

impl Delivery {
    pub fn has_user(&self) -> bool {
        !self.user_guid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_prefers_guid() {
        let user = User::with_guid("user-123").email(Some("u@example.com".into()));
        assert_eq!(user.recipient(), "user-123");
        assert_eq!(User::with_email("u@example.com").recipient(), "u@example.com");
    }

    #[test]
    fn decodes_payload_missing_newer_fields() {
        // Shape written before options, scope and request metadata existed.
        let legacy = serde_json::json!({
            "message_id": "0190a5e2-7b4f-7c3e-9a51-6d1f3b2c8e77",
            "client_id": "mister-client",
            "user_guid": "user-123",
            "some_retired_field": true,
        });

        let delivery: Delivery = serde_json::from_value(legacy).unwrap();
        assert_eq!(delivery.version, DELIVERY_VERSION);
        assert_eq!(delivery.client_id, "mister-client");
        assert_eq!(delivery.options, Options::default());
        assert!(delivery.scope.is_empty());
        assert!(delivery.has_user());
    }
}
