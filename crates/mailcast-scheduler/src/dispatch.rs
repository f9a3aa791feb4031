use std::sync::Arc;
use std::time::Duration;

use mailcast_core::config::SchedulerConfig;
use mailcast_store::{DeliveryStore, JobStatus};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::countdown::JobCountdown;
use crate::error::Result;
use crate::task::{DeliveryTask, TaskQueue};

/// `last_error` for sends still unfinished when the completion deadline hits.
pub const DEADLINE_EXCEEDED: &str = "delivery deadline exceeded";
/// `last_error` for sends whose task could not be queued during shutdown.
pub const QUEUE_CLOSED: &str = "task queue closed";
/// `last_error` for sends a worker finished without being able to record
/// the outcome.
pub const OUTCOME_UNRECORDED: &str = "delivery outcome not recorded";

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// How often the store is re-checked while waiting on the countdown.
    pub completion_poll: Duration,
    /// Overall bound on the wait; `None` waits for as long as it takes.
    pub completion_timeout: Option<Duration>,
}

impl From<&SchedulerConfig> for DispatchConfig {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            completion_poll: cfg.completion_poll(),
            completion_timeout: cfg.completion_timeout(),
        }
    }
}

/// Expands one claimed job into sends and follows it to a terminal status.
pub struct JobDispatcher {
    store: Arc<dyn DeliveryStore>,
    queue: TaskQueue,
    config: DispatchConfig,
}

impl JobDispatcher {
    pub fn new(store: Arc<dyn DeliveryStore>, queue: TaskQueue, config: DispatchConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Run a job that the caller has already moved to `running`.
    ///
    /// Returns the terminal status written to the store. An `Err` means the
    /// store failed while finalizing and the job may still read `running`.
    #[instrument(skip(self, subject, body))]
    pub async fn dispatch(&self, job_id: &str, subject: &str, body: &str) -> Result<JobStatus> {
        let subscribers = match self.store.list_subscribers() {
            Ok(subscribers) => subscribers,
            Err(e) => {
                error!("subscriber enumeration failed: {e}");
                self.finish(job_id, JobStatus::Failed, 0)?;
                return Ok(JobStatus::Failed);
            }
        };

        let countdown = JobCountdown::new();
        let subject: Arc<str> = Arc::from(subject);
        let body: Arc<str> = Arc::from(body);
        let mut tasks = Vec::with_capacity(subscribers.len());
        let mut dropped: u32 = 0;

        for subscriber in subscribers {
            match self.store.create_send(job_id, &subscriber) {
                Ok(send_id) => tasks.push(DeliveryTask::new(
                    send_id,
                    job_id.to_string(),
                    subscriber.email,
                    Arc::clone(&subject),
                    Arc::clone(&body),
                    countdown.guard(),
                )),
                Err(e) => {
                    dropped += 1;
                    warn!(subscriber_id = %subscriber.id, "send insert failed, recipient skipped: {e}");
                }
            }
        }

        let total = tasks.len();
        info!(sends = total, dropped, "job expanded");

        for task in tasks {
            let send_id = task.send_id.clone();
            if self.queue.submit(task).await.is_err() {
                warn!(%send_id, "task queue closed, failing send");
                if let Err(e) = self.store.mark_failed(&send_id, QUEUE_CLOSED) {
                    error!(%send_id, "mark failed failed: {e}");
                }
            }
        }

        self.wait_for_sends(job_id, &countdown).await?;

        let failed = self.store.count_failed(job_id)?;
        let status = if failed > 0 {
            JobStatus::CompletedWithErrors
        } else {
            JobStatus::Completed
        };
        self.finish(job_id, status, dropped)?;
        info!(sends = total, failed, %status, "job finalized");
        Ok(status)
    }

    /// Wait for every send of the job to become terminal.
    ///
    /// The countdown is the primary signal; the periodic store check catches
    /// sends settled by something other than a worker. A zero countdown only
    /// means every task was handed back, so any send still `queued` or
    /// `sending` afterwards lost its store write and is failed here.
    async fn wait_for_sends(&self, job_id: &str, countdown: &JobCountdown) -> Result<()> {
        let settle = async {
            let mut poll = tokio::time::interval(self.config.completion_poll);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
            poll.tick().await;
            loop {
                tokio::select! {
                    _ = countdown.wait() => break,
                    _ = poll.tick() => match self.store.count_unfinished(job_id) {
                        Ok(0) => break,
                        Ok(n) => debug!(remaining = n, "sends still in flight"),
                        Err(e) => warn!("completion check failed: {e}"),
                    },
                }
            }
        };

        match self.config.completion_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, settle).await.is_err() {
                    let n = self.store.fail_unfinished(job_id, DEADLINE_EXCEEDED)?;
                    warn!(failed = n, ?limit, "completion deadline exceeded");
                }
            }
            None => settle.await,
        }

        let stranded = self.store.fail_unfinished(job_id, OUTCOME_UNRECORDED)?;
        if stranded > 0 {
            warn!(failed = stranded, "sends settled without a recorded outcome");
        }
        Ok(())
    }

    fn finish(&self, job_id: &str, status: JobStatus, dropped: u32) -> Result<()> {
        if !self.store.finish_job(job_id, status, dropped)? {
            warn!(%status, "job was no longer running, status not written");
        }
        Ok(())
    }
}
