use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::types::{Job, JobStatus, SendRecord, SendStatus, Subscriber};

/// The queries the delivery core issues against durable state.
///
/// Every mutating method is a single conditional statement keyed on the
/// expected prior status and reports whether a row actually changed, so two
/// actors racing on the same record can never both win.
pub trait DeliveryStore: Send + Sync {
    /// Pending jobs whose `scheduled_at` is at or before `now`.
    fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>>;

    /// `pending → running`. Returns `false` when the job was no longer pending.
    fn claim_job(&self, job_id: &str) -> Result<bool>;

    /// All current subscribers in enumeration order.
    fn list_subscribers(&self) -> Result<Vec<Subscriber>>;

    /// Insert a `queued` send for `subscriber` and return its id.
    fn create_send(&self, job_id: &str, subscriber: &Subscriber) -> Result<String>;

    /// `queued → sending`, bumping the attempt counter.
    fn mark_sending(&self, send_id: &str) -> Result<bool>;

    /// `sending → sent`, stamping `sent_at`.
    fn mark_sent(&self, send_id: &str) -> Result<bool>;

    /// `queued | sending → failed`, recording `error` verbatim.
    fn mark_failed(&self, send_id: &str, error: &str) -> Result<bool>;

    /// Sends of the job still `queued` or `sending`.
    fn count_unfinished(&self, job_id: &str) -> Result<u64>;

    /// Sends of the job that ended `failed`.
    fn count_failed(&self, job_id: &str) -> Result<u64>;

    /// Fail every still-unfinished send of the job. Returns how many changed.
    fn fail_unfinished(&self, job_id: &str, error: &str) -> Result<u64>;

    /// `running → status` (which must be terminal), stamping `completed_at`.
    fn finish_job(&self, job_id: &str, status: JobStatus, dropped_recipients: u32)
        -> Result<bool>;
}

/// SQLite-backed [`DeliveryStore`].
///
/// Wraps a single connection in a `Mutex`; every statement is short and
/// single-row, so contention between the scheduler, dispatchers and workers
/// stays low on a single node.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Open (or create) the database file at `path` in WAL mode.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite half-written.
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a new job. `scheduled_at = None` makes it due immediately.
    #[instrument(skip(self, body), fields(subject = %subject))]
    pub fn create_job(
        &self,
        subject: &str,
        body: &str,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Job> {
        let now = now_secs();
        let due = scheduled_at.map(|t| t.timestamp()).unwrap_or(now);
        let id = Uuid::now_v7().to_string();

        self.conn().execute(
            "INSERT INTO jobs (id, subject, body, scheduled_at, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
            rusqlite::params![id, subject, body, due, now],
        )?;
        info!(job_id = %id, scheduled_at = due, "job created");

        Ok(Job {
            id,
            subject: subject.to_string(),
            body: body.to_string(),
            scheduled_at: from_secs(due)?,
            status: JobStatus::Pending,
            created_at: from_secs(now)?,
            completed_at: None,
            dropped_recipients: 0,
        })
    }

    /// All jobs, newest first.
    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT id, subject, body, scheduled_at, status, created_at,
                    completed_at, dropped_recipients
             FROM jobs ORDER BY created_at DESC, id DESC",
        )?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn get_job(&self, id: &str) -> Result<Job> {
        self.conn()
            .query_row(
                "SELECT id, subject, body, scheduled_at, status, created_at,
                        completed_at, dropped_recipients
                 FROM jobs WHERE id = ?1",
                [id],
                row_to_job,
            )
            .optional()?
            .ok_or_else(|| StoreError::JobNotFound { id: id.to_string() })
    }

    /// Import one subscriber. Duplicate addresses fail with a constraint error.
    pub fn add_subscriber(&self, email: &str) -> Result<Subscriber> {
        let now = now_secs();
        let id = Uuid::now_v7().to_string();
        self.conn().execute(
            "INSERT INTO subscribers (id, email, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, email, now],
        )?;
        debug!(subscriber_id = %id, "subscriber added");
        Ok(Subscriber {
            id,
            email: email.to_string(),
            created_at: from_secs(now)?,
        })
    }

    /// Sends belonging to `job_id` in creation order.
    pub fn list_sends(&self, job_id: &str) -> Result<Vec<SendRecord>> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT id, job_id, subscriber_id, email, status, attempts,
                    last_error, created_at, sent_at
             FROM sends WHERE job_id = ?1 ORDER BY created_at, id",
        )?;
        let sends = stmt
            .query_map([job_id], row_to_send)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sends)
    }
}

impl DeliveryStore for SqliteStore {
    fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let db = self.conn();
        let mut stmt = db.prepare_cached(
            "SELECT id, subject, body, scheduled_at, status, created_at,
                    completed_at, dropped_recipients
             FROM jobs
             WHERE status = 'pending' AND scheduled_at <= ?1
             ORDER BY scheduled_at, id",
        )?;
        let jobs = stmt
            .query_map([now.timestamp()], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn claim_job(&self, job_id: &str) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE jobs SET status = 'running' WHERE id = ?1 AND status = 'pending'",
            [job_id],
        )?;
        Ok(n == 1)
    }

    fn list_subscribers(&self) -> Result<Vec<Subscriber>> {
        let db = self.conn();
        let mut stmt = db.prepare_cached(
            "SELECT id, email, created_at FROM subscribers ORDER BY created_at, id",
        )?;
        let subscribers = stmt
            .query_map([], |row| {
                Ok(Subscriber {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    created_at: ts(row, 2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(subscribers)
    }

    fn create_send(&self, job_id: &str, subscriber: &Subscriber) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        self.conn().execute(
            "INSERT INTO sends (id, job_id, subscriber_id, email, status, attempts, created_at)
             VALUES (?1, ?2, ?3, ?4, 'queued', 0, ?5)",
            rusqlite::params![id, job_id, subscriber.id, subscriber.email, now_secs()],
        )?;
        Ok(id)
    }

    fn mark_sending(&self, send_id: &str) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE sends SET status = 'sending', attempts = attempts + 1
             WHERE id = ?1 AND status = 'queued'",
            [send_id],
        )?;
        Ok(n == 1)
    }

    fn mark_sent(&self, send_id: &str) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE sends SET status = 'sent', sent_at = ?1
             WHERE id = ?2 AND status = 'sending'",
            rusqlite::params![now_secs(), send_id],
        )?;
        Ok(n == 1)
    }

    fn mark_failed(&self, send_id: &str, error: &str) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE sends SET status = 'failed', last_error = ?1
             WHERE id = ?2 AND status IN ('queued', 'sending')",
            rusqlite::params![error, send_id],
        )?;
        Ok(n == 1)
    }

    fn count_unfinished(&self, job_id: &str) -> Result<u64> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM sends WHERE job_id = ?1 AND status IN ('queued', 'sending')",
            [job_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    fn count_failed(&self, job_id: &str) -> Result<u64> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM sends WHERE job_id = ?1 AND status = 'failed'",
            [job_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    fn fail_unfinished(&self, job_id: &str, error: &str) -> Result<u64> {
        let n = self.conn().execute(
            "UPDATE sends SET status = 'failed', last_error = ?1
             WHERE job_id = ?2 AND status IN ('queued', 'sending')",
            rusqlite::params![error, job_id],
        )?;
        Ok(n as u64)
    }

    fn finish_job(
        &self,
        job_id: &str,
        status: JobStatus,
        dropped_recipients: u32,
    ) -> Result<bool> {
        if !JobStatus::Running.can_transition_to(status) {
            return Err(StoreError::InvalidStatus(format!(
                "cannot finish job as {status}"
            )));
        }
        let n = self.conn().execute(
            "UPDATE jobs SET status = ?1, completed_at = ?2, dropped_recipients = ?3
             WHERE id = ?4 AND status = 'running'",
            rusqlite::params![status.as_str(), now_secs(), dropped_recipients, job_id],
        )?;
        Ok(n == 1)
    }
}

// --- row mapping ------------------------------------------------------------

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        subject: row.get(1)?,
        body: row.get(2)?,
        scheduled_at: ts(row, 3)?,
        status: status(row, 4)?,
        created_at: ts(row, 5)?,
        completed_at: opt_ts(row, 6)?,
        dropped_recipients: row.get(7)?,
    })
}

fn row_to_send(row: &Row<'_>) -> rusqlite::Result<SendRecord> {
    Ok(SendRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        subscriber_id: row.get(2)?,
        email: row.get(3)?,
        status: status::<SendStatus>(row, 4)?,
        attempts: row.get(5)?,
        last_error: row.get(6)?,
        created_at: ts(row, 7)?,
        sent_at: opt_ts(row, 8)?,
    })
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}

fn from_secs(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or(StoreError::InvalidTimestamp(secs))
}

fn ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let secs: i64 = row.get(idx)?;
    from_secs(secs)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => ts(row, idx).map(Some),
        None => Ok(None),
    }
}

fn status<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        let err = StoreError::InvalidStatus(e);
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
    })
}
