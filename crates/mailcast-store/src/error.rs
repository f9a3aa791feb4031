use thiserror::Error;

/// Errors that can occur while reading or writing delivery state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// A status string in the database (or a requested transition) is not valid.
    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// A stored unix timestamp is outside chrono's representable range.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}

pub type Result<T> = std::result::Result<T, StoreError>;
