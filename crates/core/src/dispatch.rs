//! Transient strategy input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delivery::Html;

/// Content the caller asked to send.
///
/// Empty strings mean "not provided"; strategies pick templates accordingly
/// (e.g. `subject.missing` when `subject` is empty).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchMessage {
    pub to: String,
    pub reply_to: String,
    pub subject: String,
    pub text: String,
    pub html: Html,
}

/// Registered notification kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchKind {
    pub id: String,
    pub description: String,
    /// Critical kinds ignore unsubscribe preferences.
    pub critical: bool,
}

/// Registered client (the sending component).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchClient {
    pub id: String,
    pub description: String,
}

/// One request to notify an audience.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispatch {
    /// Audience target: a user, space or organization GUID, or a scope name.
    /// Unused by the email audience, which addresses `message.to`.
    pub guid: String,
    pub vcap_request_id: String,
    pub message: DispatchMessage,
    pub kind: DispatchKind,
    pub client: DispatchClient,
    /// Organization role filter (`OrgManager`, `OrgAuditor`, `BillingManager`).
    pub role: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl Dispatch {
    pub fn new(guid: impl Into<String>, client: DispatchClient, kind: DispatchKind) -> Self {
        Self {
            guid: guid.into(),
            vcap_request_id: String::new(),
            message: DispatchMessage::default(),
            kind,
            client,
            role: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: DispatchMessage) -> Self {
        self.message = message;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_vcap_request_id(mut self, id: impl Into<String>) -> Self {
        self.vcap_request_id = id.into();
        self
    }

    /// Template suffix for the subject line.
    pub fn subject_suffix(&self) -> &'static str {
        if self.message.subject.is_empty() {
            "subject.missing"
        } else {
            "subject.provided"
        }
    }
}
