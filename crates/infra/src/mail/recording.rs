//! In-process mail sink for tests and local runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::{validate_address, MailError, Mailer, MailerFactory, OutboundMail};

/// What the sink does with a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendBehaviour {
    #[default]
    Accept,
    FailTransient,
    FailPermanent,
}

#[derive(Debug, Default)]
struct Inner {
    default: SendBehaviour,
    per_recipient: HashMap<String, SendBehaviour>,
    sent: Vec<OutboundMail>,
    attempts: usize,
    connects: usize,
}

/// Records every accepted message. Clones share state, so the same sink can
/// back a whole worker pool.
#[derive(Debug, Clone, Default)]
pub struct RecordingMailer {
    inner: Arc<Mutex<Inner>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behaviour(behaviour: SendBehaviour) -> Self {
        let mailer = Self::new();
        mailer.set_behaviour(behaviour);
        mailer
    }

    pub fn set_behaviour(&self, behaviour: SendBehaviour) {
        self.lock().default = behaviour;
    }

    /// Override the behaviour for one recipient address.
    pub fn set_behaviour_for(&self, to: impl Into<String>, behaviour: SendBehaviour) {
        self.lock().per_recipient.insert(to.into(), behaviour);
    }

    pub fn sent(&self) -> Vec<OutboundMail> {
        self.lock().sent.clone()
    }

    /// Send attempts, accepted or not.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn connect(&mut self) -> Result<(), MailError> {
        self.lock().connects += 1;
        Ok(())
    }

    async fn send(&mut self, mail: &OutboundMail) -> Result<(), MailError> {
        let mut inner = self.lock();
        inner.attempts += 1;

        validate_address(&mail.to)?;

        let behaviour = inner
            .per_recipient
            .get(&mail.to)
            .copied()
            .unwrap_or(inner.default);
        match behaviour {
            SendBehaviour::Accept => {
                inner.sent.push(mail.clone());
                Ok(())
            }
            SendBehaviour::FailTransient => {
                Err(MailError::Transient("421 service not available".to_string()))
            }
            SendBehaviour::FailPermanent => {
                Err(MailError::Permanent("550 mailbox unavailable".to_string()))
            }
        }
    }
}

impl MailerFactory for RecordingMailer {
    fn create(&self) -> Box<dyn Mailer> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail(to: &str) -> OutboundMail {
        OutboundMail {
            from: "no-reply@example.com".into(),
            to: to.into(),
            reply_to: None,
            subject: "hello".into(),
            text: "body".into(),
            html: None,
            headers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn clones_share_the_sink() {
        let sink = RecordingMailer::new();
        let mut a = sink.create();
        let mut b = sink.create();

        a.send(&mail("one@example.com")).await.unwrap();
        b.send(&mail("two@example.com")).await.unwrap();

        assert_eq!(sink.sent().len(), 2);
    }

    #[tokio::test]
    async fn malformed_address_never_recorded() {
        let mut sink = RecordingMailer::new();
        let err = sink.send(&mail("nope")).await.unwrap_err();

        assert!(err.is_permanent());
        assert!(sink.sent().is_empty());
        assert_eq!(sink.attempts(), 1);
    }

    #[tokio::test]
    async fn per_recipient_override() {
        let mut sink = RecordingMailer::new();
        sink.set_behaviour_for("flaky@example.com", SendBehaviour::FailTransient);

        assert!(matches!(
            sink.send(&mail("flaky@example.com")).await,
            Err(MailError::Transient(_))
        ));
        sink.send(&mail("fine@example.com")).await.unwrap();
        assert_eq!(sink.sent().len(), 1);
    }
}
