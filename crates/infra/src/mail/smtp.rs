//! SMTP transport over lettre.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, warn};

use super::{validate_address, MailError, Mailer, MailerFactory, OutboundMail};

/// Connection security towards the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpTls {
    None,
    StartTls,
    Tls,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub tls: SmtpTls,
}

type Transport = AsyncSmtpTransport<Tokio1Executor>;

fn build_transport(config: &SmtpConfig) -> Result<Transport, MailError> {
    let builder = match config.tls {
        SmtpTls::None => Transport::builder_dangerous(&config.host),
        SmtpTls::StartTls | SmtpTls::Tls => {
            let params = TlsParameters::new(config.host.clone())
                .map_err(|e| MailError::Permanent(format!("TLS configuration error: {e}")))?;
            let tls = if config.tls == SmtpTls::Tls {
                Tls::Wrapper(params)
            } else {
                Tls::Required(params)
            };
            Transport::builder_dangerous(&config.host).tls(tls)
        }
    };

    let builder = builder.port(config.port);
    let builder = match (&config.user, &config.pass) {
        (Some(user), Some(pass)) => builder.credentials(Credentials::new(user.clone(), pass.clone())),
        _ => builder,
    };
    Ok(builder.build())
}

/// Builds one `SmtpMailer` per worker from shared settings.
#[derive(Debug, Clone)]
pub struct SmtpMailerFactory {
    config: Arc<SmtpConfig>,
}

impl SmtpMailerFactory {
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl MailerFactory for SmtpMailerFactory {
    fn create(&self) -> Box<dyn Mailer> {
        Box::new(SmtpMailer::new(self.config.clone()))
    }
}

/// One worker's SMTP connection. The transport is built lazily on `connect`.
pub struct SmtpMailer {
    config: Arc<SmtpConfig>,
    transport: Option<Transport>,
}

impl SmtpMailer {
    pub fn new(config: Arc<SmtpConfig>) -> Self {
        Self {
            config,
            transport: None,
        }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn connect(&mut self) -> Result<(), MailError> {
        let transport = build_transport(&self.config)?;
        match transport.test_connection().await {
            Ok(true) => debug!(host = %self.config.host, "smtp connection established"),
            Ok(false) => warn!(host = %self.config.host, "smtp relay did not answer NOOP"),
            Err(e) => return Err(classify(e)),
        }
        self.transport = Some(transport);
        Ok(())
    }

    async fn send(&mut self, mail: &OutboundMail) -> Result<(), MailError> {
        let message = build_message(mail)?;
        if self.transport.is_none() {
            self.connect().await?;
        }
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| MailError::Transient("smtp transport unavailable".to_string()))?;

        match transport.send(message).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = classify(e);
                if !err.is_permanent() {
                    // Rebuild the connection on the next attempt
                    self.transport = None;
                }
                Err(err)
            }
        }
    }
}

fn classify(err: lettre::transport::smtp::Error) -> MailError {
    if err.is_permanent() {
        MailError::Permanent(err.to_string())
    } else {
        MailError::Transient(err.to_string())
    }
}

/// Convert a rendered mail into a lettre message.
pub fn build_message(mail: &OutboundMail) -> Result<Message, MailError> {
    let mailbox = |raw: &str| validate_address(raw).map(|addr| Mailbox::new(None, addr));

    let mut builder = Message::builder()
        .from(mailbox(&mail.from)?)
        .to(mailbox(&mail.to)?)
        .subject(mail.subject.as_str());

    if let Some(reply_to) = mail.reply_to.as_deref().filter(|r| !r.trim().is_empty()) {
        builder = builder.reply_to(mailbox(reply_to)?);
    }

    for (name, value) in &mail.headers {
        let name = HeaderName::new_from_ascii(name.clone())
            .map_err(|e| MailError::Permanent(format!("invalid header name {name:?}: {e}")))?;
        builder = builder.raw_header(HeaderValue::new(name, value.clone()));
    }

    let built = match &mail.html {
        Some(html) => builder.multipart(MultiPart::alternative_plain_html(
            mail.text.clone(),
            html.clone(),
        )),
        None => builder.header(ContentType::TEXT_PLAIN).body(mail.text.clone()),
    };

    built.map_err(|e| MailError::Permanent(format!("failed to build email: {e}")))
}
