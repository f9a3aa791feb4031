/// Why a single message could not be delivered.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Build email: {0}")]
    Build(String),

    #[error("SMTP transport: {0}")]
    Transport(String),

    /// The server answered but refused the message.
    #[error("Rejected by server: {0}")]
    Rejected(String),
}
