use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mailcast_core::config::SchedulerConfig;
use mailcast_store::DeliveryStore;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::dispatch::{DispatchConfig, JobDispatcher};
use crate::error::Result;
use crate::task::TaskQueue;

/// Periodically claims due jobs and supervises one dispatcher per claim.
///
/// Dispatchers run in a [`JoinSet`] owned by the engine, so shutdown can wait
/// for every in-flight job to finish instead of abandoning it mid-send.
pub struct SchedulerEngine {
    store: Arc<dyn DeliveryStore>,
    dispatcher: Arc<JobDispatcher>,
    tick_interval: Duration,
    dispatches: JoinSet<()>,
}

impl SchedulerEngine {
    pub fn new(store: Arc<dyn DeliveryStore>, queue: TaskQueue, config: &SchedulerConfig) -> Self {
        let dispatcher = JobDispatcher::new(Arc::clone(&store), queue, DispatchConfig::from(config));
        Self {
            store,
            dispatcher: Arc::new(dispatcher),
            tick_interval: config.tick_interval(),
            dispatches: JoinSet::new(),
        }
    }

    /// Number of dispatchers that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.dispatches.len()
    }

    /// One scan against the wall clock.
    pub fn tick(&mut self) -> Result<usize> {
        self.tick_at(Utc::now())
    }

    /// Claim every job due at `now` and spawn its dispatcher.
    ///
    /// Returns how many jobs this tick claimed. A store error abandons the
    /// rest of the tick; the next one retries, since claiming is conditional.
    /// Must be called from within a Tokio runtime.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> Result<usize> {
        self.reap_finished();

        let due = self.store.due_jobs(now)?;
        let mut claimed = 0;
        for job in due {
            if !self.store.claim_job(&job.id)? {
                debug!(job_id = %job.id, "job already claimed, skipping");
                continue;
            }
            claimed += 1;
            info!(job_id = %job.id, subject = %job.subject, "job claimed");

            let dispatcher = Arc::clone(&self.dispatcher);
            self.dispatches.spawn(async move {
                if let Err(e) = dispatcher.dispatch(&job.id, &job.subject, &job.body).await {
                    error!(job_id = %job.id, "dispatch failed: {e}");
                }
            });
        }
        Ok(claimed)
    }

    /// Wait for every in-flight dispatcher to finish.
    pub async fn drain(&mut self) {
        while let Some(res) = self.dispatches.join_next().await {
            if let Err(e) = res {
                error!("dispatcher task panicked: {e}");
            }
        }
    }

    /// Main loop. Ticks until `shutdown` broadcasts `true` (or its sender is
    /// dropped), then drains in-flight dispatchers before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.tick_interval, "scheduler engine started");

        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        error!("scheduler tick error: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = self.in_flight(), "scheduler engine shutting down, draining dispatchers");
        self.drain().await;
        info!("scheduler engine stopped");
    }

    fn reap_finished(&mut self) {
        while let Some(res) = self.dispatches.try_join_next() {
            if let Err(e) = res {
                error!("dispatcher task panicked: {e}");
            }
        }
    }
}
