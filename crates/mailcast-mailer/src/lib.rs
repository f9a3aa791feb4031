//! `mailcast-mailer` — the outbound transport used by delivery workers.
//!
//! Workers only see the [`Mailer`] trait. [`build_mailer`] picks the SMTP
//! relay when an `[smtp]` section is configured and falls back to the
//! log-only [`LogMailer`] otherwise, so a fresh install can be exercised
//! end to end without credentials.

pub mod error;
pub mod log;
pub mod smtp;

use std::sync::Arc;

use async_trait::async_trait;
use mailcast_core::config::SmtpConfig;

pub use error::MailError;
pub use log::LogMailer;
pub use smtp::SmtpMailer;

/// Delivers one message to one recipient.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Mailer name for logging.
    fn name(&self) -> &str;

    /// Send a plain-text message. The error's `Display` text is what ends up
    /// in the send record's `last_error`.
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// Build the mailer for the given SMTP settings.
pub fn build_mailer(smtp: Option<&SmtpConfig>) -> Result<Arc<dyn Mailer>, MailError> {
    match smtp {
        Some(cfg) => {
            let mailer = SmtpMailer::new(cfg)?;
            tracing::info!(host = %cfg.host, port = cfg.port, "using SMTP mailer");
            Ok(Arc::new(mailer))
        }
        None => {
            tracing::warn!("no [smtp] section configured, messages will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}
