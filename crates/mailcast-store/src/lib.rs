//! `mailcast-store` — durable SQLite state for subscribers, jobs and sends.
//!
//! Nothing about a job's progress lives only in memory: the scheduler, the
//! dispatchers and the workers all read and write through a
//! [`DeliveryStore`]. [`SqliteStore`] is the production implementation and
//! also carries the service-layer operations (create/list jobs, import
//! subscribers) used by the HTTP gateway.
//!
//! # Status machines
//!
//! | Record | Transitions                                                   |
//! |--------|---------------------------------------------------------------|
//! | Job    | `pending → running → completed / completed_with_errors / failed` |
//! | Send   | `queued → sending → sent / failed` (and `queued → failed`)     |
//!
//! Every transition is a conditional `UPDATE … WHERE status = <expected>`,
//! so terminal states are absorbing and a job can be claimed only once.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::{DeliveryStore, SqliteStore};
pub use types::{Job, JobStatus, SendRecord, SendStatus, Subscriber};
