use async_trait::async_trait;
use tracing::info;

use crate::{MailError, Mailer};

/// Mock transport: logs the message and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        info!(%to, %subject, body_len = body.len(), "mock send");
        Ok(())
    }
}
