use std::sync::Arc;

use tokio::sync::mpsc;

use crate::countdown::CompletionGuard;
use crate::error::{Result, SchedulerError};

/// One recipient delivery, as handed from a dispatcher to the worker pool.
///
/// Subject and body are shared between all tasks of a job.
#[derive(Debug)]
pub struct DeliveryTask {
    pub send_id: String,
    pub job_id: String,
    pub email: String,
    pub subject: Arc<str>,
    pub body: Arc<str>,
    /// Dropped by the worker once it is done with the send, even when the
    /// outcome could not be written.
    completion: CompletionGuard,
}

impl DeliveryTask {
    pub fn new(
        send_id: String,
        job_id: String,
        email: String,
        subject: Arc<str>,
        body: Arc<str>,
        completion: CompletionGuard,
    ) -> Self {
        Self {
            send_id,
            job_id,
            email,
            subject,
            body,
            completion,
        }
    }

    /// Signal the owning job that this delivery is settled.
    pub fn complete(self) {
        drop(self.completion);
    }
}

/// Submit side of the bounded task queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<DeliveryTask>,
}

impl TaskQueue {
    pub(crate) fn new(tx: mpsc::Sender<DeliveryTask>) -> Self {
        Self { tx }
    }

    /// Enqueue a task, waiting for capacity when the queue is full.
    ///
    /// Fails only when every worker has exited; the rejected task is dropped,
    /// which settles its completion guard.
    pub async fn submit(&self, task: DeliveryTask) -> Result<()> {
        self.tx
            .send(task)
            .await
            .map_err(|_| SchedulerError::QueueClosed)
    }
}
