use std::sync::Arc;
use std::time::Duration;

use mailcast_core::config::WorkerConfig;
use mailcast_mailer::Mailer;
use mailcast_store::DeliveryStore;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::task::{DeliveryTask, TaskQueue};

/// Sizing of the worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Deadline for a single mailer call; `None` waits indefinitely.
    pub send_timeout: Option<Duration>,
}

impl From<&WorkerConfig> for PoolConfig {
    fn from(cfg: &WorkerConfig) -> Self {
        Self {
            workers: cfg.worker_count(),
            queue_capacity: cfg.capacity(),
            send_timeout: cfg.send_timeout(),
        }
    }
}

/// Fixed set of workers draining one bounded task queue.
///
/// Workers run until every [`TaskQueue`] handle has been dropped and the
/// queue is empty. A failed delivery is recorded on its send row and never
/// stops a worker.
pub struct WorkerPool {
    queue: TaskQueue,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.workers` workers on the current Tokio runtime.
    pub fn start(
        config: PoolConfig,
        store: Arc<dyn DeliveryStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let workers = config.workers.max(1);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (1..=workers)
            .map(|idx| {
                let worker = Worker {
                    idx,
                    store: Arc::clone(&store),
                    mailer: Arc::clone(&mailer),
                    send_timeout: config.send_timeout,
                };
                let rx = Arc::clone(&rx);
                tokio::spawn(async move { worker.run(rx).await })
            })
            .collect();

        info!(
            workers,
            capacity = config.queue_capacity,
            mailer = mailer.name(),
            "worker pool started"
        );
        Self {
            queue: TaskQueue::new(tx),
            workers: handles,
        }
    }

    /// A submit handle for dispatchers.
    pub fn queue(&self) -> TaskQueue {
        self.queue.clone()
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Close the pool's own handle and wait for the workers to drain the queue.
    ///
    /// Returns once every other [`TaskQueue`] clone is gone too.
    pub async fn shutdown(self) {
        drop(self.queue);
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!("worker task panicked: {e}");
            }
        }
        info!("worker pool stopped");
    }
}

struct Worker {
    idx: usize,
    store: Arc<dyn DeliveryStore>,
    mailer: Arc<dyn Mailer>,
    send_timeout: Option<Duration>,
}

impl Worker {
    async fn run(self, rx: Arc<Mutex<mpsc::Receiver<DeliveryTask>>>) {
        debug!(worker = self.idx, "worker started");
        loop {
            // Hold the lock only while waiting for the next task.
            let next = rx.lock().await.recv().await;
            let Some(task) = next else { break };
            self.deliver(task).await;
        }
        debug!(worker = self.idx, "worker stopped");
    }

    async fn deliver(&self, task: DeliveryTask) {
        match self.store.mark_sending(&task.send_id) {
            Ok(true) => {}
            Ok(false) => {
                // Failed by the dispatcher's deadline before we got to it.
                debug!(worker = self.idx, send_id = %task.send_id, "send no longer queued, skipping");
                task.complete();
                return;
            }
            Err(e) => {
                error!(worker = self.idx, send_id = %task.send_id, "mark sending failed: {e}");
                self.record_failure(&task, &e.to_string());
                task.complete();
                return;
            }
        }

        match self.attempt(&task).await {
            Ok(()) => match self.store.mark_sent(&task.send_id) {
                Ok(true) => {
                    info!(worker = self.idx, job_id = %task.job_id, email = %task.email, "sent");
                }
                Ok(false) => {
                    warn!(worker = self.idx, send_id = %task.send_id, "delivered after send was already finalized");
                }
                Err(e) => {
                    error!(worker = self.idx, send_id = %task.send_id, "mark sent failed: {e}");
                }
            },
            Err(reason) => {
                warn!(
                    worker = self.idx,
                    job_id = %task.job_id,
                    email = %task.email,
                    error = %reason,
                    "send failed"
                );
                self.record_failure(&task, &reason);
            }
        }

        task.complete();
    }

    /// One mailer call, bounded by the send timeout.
    async fn attempt(&self, task: &DeliveryTask) -> Result<(), String> {
        let send = self.mailer.send(&task.email, &task.subject, &task.body);
        match self.send_timeout {
            Some(limit) => match tokio::time::timeout(limit, send).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("send timed out after {limit:?}")),
            },
            None => send.await.map_err(|e| e.to_string()),
        }
    }

    fn record_failure(&self, task: &DeliveryTask, reason: &str) {
        if let Err(e) = self.store.mark_failed(&task.send_id, reason) {
            error!(worker = self.idx, send_id = %task.send_id, "mark failed failed: {e}");
        }
    }
}
