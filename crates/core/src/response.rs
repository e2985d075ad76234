use serde::{Deserialize, Serialize};

use crate::id::MessageId;
use crate::message::MessageStatus;

/// Synchronous answer for one admitted recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: MessageStatus,
    pub recipient: String,
    pub notification_id: MessageId,
    pub email: String,
    pub vcap_request_id: String,
}

impl Response {
    pub fn queued(
        recipient: impl Into<String>,
        notification_id: MessageId,
        email: impl Into<String>,
        vcap_request_id: impl Into<String>,
    ) -> Self {
        Self {
            status: MessageStatus::Queued,
            recipient: recipient.into(),
            notification_id,
            email: email.into(),
            vcap_request_id: vcap_request_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_snake_case_keys() {
        let id = MessageId::new();
        let response = Response::queued("user-123", id, "", "req-1");
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["status"], "queued");
        assert_eq!(json["recipient"], "user-123");
        assert_eq!(json["notification_id"], id.to_string());
        assert_eq!(json["vcap_request_id"], "req-1");
    }
}
