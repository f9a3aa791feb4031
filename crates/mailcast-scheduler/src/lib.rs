//! `mailcast-scheduler` — turns due jobs into per-recipient deliveries.
//!
//! # Overview
//!
//! ```text
//! SchedulerEngine ──claim──▶ JobDispatcher ──tasks──▶ TaskQueue ──▶ WorkerPool
//!        ▲                        │  ▲                                 │
//!        └── tick interval        │  └──────── JobCountdown ◀──────────┘
//!                                 ▼
//!                        finish_job (store)
//! ```
//!
//! The [`engine::SchedulerEngine`] wakes on a fixed interval, claims every
//! pending job whose `scheduled_at` has passed and hands it to a
//! [`dispatch::JobDispatcher`] running in its own task. The dispatcher
//! writes one `queued` send per subscriber, pushes one
//! [`task::DeliveryTask`] per send into the bounded queue and waits on a
//! [`countdown::JobCountdown`] that the [`pool::WorkerPool`] ticks down as
//! it finishes with each send. Once it hits zero, any send still lacking a
//! recorded outcome is failed and the job is finalized.
//!
//! Workers only touch send rows; only the dispatcher that owns a running
//! job writes its terminal status.

pub mod countdown;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod pool;
pub mod task;

pub use countdown::{CompletionGuard, JobCountdown};
pub use dispatch::{
    DispatchConfig, JobDispatcher, DEADLINE_EXCEEDED, OUTCOME_UNRECORDED, QUEUE_CLOSED,
};
pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use pool::{PoolConfig, WorkerPool};
pub use task::{DeliveryTask, TaskQueue};
