use mailcast_store::StoreError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Reading or writing delivery state failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The worker pool has shut down and no longer accepts tasks.
    #[error("task queue closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
