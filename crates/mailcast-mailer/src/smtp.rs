use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use mailcast_core::config::SmtpConfig;
use tracing::debug;

use crate::{MailError, Mailer};

/// Delivers through an SMTP relay using STARTTLS.
///
/// The transport (and its connection pool) is built once and shared by every
/// worker; lettre hands out pooled connections per send.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> Result<Self, MailError> {
        let from: Mailbox = cfg
            .from
            .parse()
            .map_err(|e| MailError::InvalidAddress(format!("from {}: {e}", cfg.from)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .map_err(|e| MailError::Transport(format!("relay {}: {e}", cfg.host)))?
            .port(cfg.port);
        if !cfg.username.is_empty() {
            builder =
                builder.credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    /// Assemble a plain-text UTF-8 message.
    pub fn build_message(&self, to: &str, subject: &str, body: &str) -> Result<Message, MailError> {
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| MailError::InvalidAddress(format!("{to}: {e}")))?;

        Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| MailError::Build(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let message = self.build_message(to, subject, body)?;
        match self.transport.send(message).await {
            Ok(response) => {
                debug!(%to, code = %response.code(), "smtp accepted message");
                Ok(())
            }
            Err(e) if e.is_permanent() => Err(MailError::Rejected(e.to_string())),
            Err(e) => Err(MailError::Transport(e.to_string())),
        }
    }
}
