use rusqlite::Connection;

use crate::error::Result;

/// Initialise the delivery schema in `conn`.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout. Foreign
/// keys are switched on for this connection so deleting a job or subscriber
/// cascades to its sends.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS subscribers (
            id          TEXT    NOT NULL PRIMARY KEY,
            email       TEXT    NOT NULL UNIQUE,
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS jobs (
            id                  TEXT    NOT NULL PRIMARY KEY,
            subject             TEXT    NOT NULL,
            body                TEXT    NOT NULL,
            scheduled_at        INTEGER NOT NULL,   -- unix seconds
            status              TEXT    NOT NULL DEFAULT 'pending',
            created_at          INTEGER NOT NULL,
            completed_at        INTEGER,
            dropped_recipients  INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS sends (
            id             TEXT    NOT NULL PRIMARY KEY,
            job_id         TEXT    NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            subscriber_id  TEXT    NOT NULL REFERENCES subscribers(id) ON DELETE CASCADE,
            email          TEXT    NOT NULL,
            status         TEXT    NOT NULL DEFAULT 'queued',
            attempts       INTEGER NOT NULL DEFAULT 0,
            last_error     TEXT,
            created_at     INTEGER NOT NULL,
            sent_at        INTEGER,
            UNIQUE (job_id, subscriber_id)
        );

        -- Due-job scan: WHERE status = 'pending' AND scheduled_at <= ?
        CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs (status, scheduled_at);
        -- Completion counts: WHERE job_id = ? AND status IN (...)
        CREATE INDEX IF NOT EXISTS idx_sends_job_status ON sends (job_id, status);
        ",
    )?;
    Ok(())
}
