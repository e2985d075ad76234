//! Outbound mail transport.
//!
//! Each delivery worker owns one `Mailer` created from a shared `MailerFactory`;
//! transports are never shared between workers.

pub mod recording;
pub mod smtp;

pub use recording::{RecordingMailer, SendBehaviour};
pub use smtp::{SmtpConfig, SmtpMailer, SmtpMailerFactory, SmtpTls};

use async_trait::async_trait;
use lettre::Address;
use thiserror::Error;

pub const HEADER_CLIENT_ID: &str = "X-CF-Client-ID";
pub const HEADER_NOTIFICATION_ID: &str = "X-CF-Notification-ID";
pub const HEADER_REQUEST_RECEIVED: &str = "X-CF-Notification-Request-Received";
pub const HEADER_VCAP_REQUEST_ID: &str = "X-Vcap-Request-Id";

/// A fully rendered message ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMail {
    pub from: String,
    pub to: String,
    pub reply_to: Option<String>,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
    /// Extra headers, in insertion order
    pub headers: Vec<(String, String)>,
}

impl OutboundMail {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Send failure, classified by whether another attempt could succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailError {
    /// Connection problems, timeouts, 4xx replies.
    #[error("transient mail error: {0}")]
    Transient(String),
    /// Malformed addresses, 5xx replies.
    #[error("permanent mail error: {0}")]
    Permanent(String),
}

impl MailError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, MailError::Permanent(_))
    }
}

/// A single mail connection.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Establish (or verify) the connection to the relay.
    async fn connect(&mut self) -> Result<(), MailError>;

    async fn send(&mut self, mail: &OutboundMail) -> Result<(), MailError>;
}

/// Creates one `Mailer` per worker.
pub trait MailerFactory: Send + Sync {
    fn create(&self) -> Box<dyn Mailer>;
}

/// Parse an email address; failures are permanent.
pub fn validate_address(raw: &str) -> Result<Address, MailError> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| MailError::Permanent(format!("invalid address {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_addresses() {
        assert!(validate_address("user@example.com").is_ok());
        assert!(validate_address("  user@example.com ").is_ok());
    }

    #[test]
    fn rejects_malformed_addresses_permanently() {
        for raw in ["", "not-an-address", "user@", "@example.com", "a b@example.com"] {
            let err = validate_address(raw).unwrap_err();
            assert!(err.is_permanent(), "{raw:?} should be permanent");
        }
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mail = OutboundMail {
            from: "a@example.com".into(),
            to: "b@example.com".into(),
            reply_to: None,
            subject: "s".into(),
            text: "t".into(),
            html: None,
            headers: vec![(HEADER_VCAP_REQUEST_ID.into(), "req-1".into())],
        };
        assert_eq!(mail.header("x-vcap-request-id"), Some("req-1"));
        assert_eq!(mail.header(HEADER_CLIENT_ID), None);
    }
}
