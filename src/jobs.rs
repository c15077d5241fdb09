use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Job, NewJob};
use crate::schema::jobs;

pub const JOB_DELIVER_NOTIFICATION: &str = "deliver-notification";
pub const JOB_SEND_EMAIL: &str = "send-email";
pub const JOB_SUMMARIZE_TICKET: &str = "summarize-ticket";

/// Summary jobs are retried with backoff up to this many attempts.
pub const MAX_SUMMARY_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Queues a side effect. Jobs without `run_after` are ready immediately.
pub fn enqueue_job(
    conn: &mut PgConnection,
    job_type: &str,
    payload: Value,
    run_after: Option<NaiveDateTime>,
) -> JobQueueResult<Job> {
    let job = diesel::insert_into(jobs::table)
        .values(&NewJob {
            id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            payload,
            status: JobStatus::Queued.as_str().to_string(),
            run_after: run_after.unwrap_or_else(now),
        })
        .get_result(conn)?;
    Ok(job)
}

/// Claims the oldest ready job of one of `job_types` and counts the attempt.
/// Rows locked by another worker are skipped.
pub fn reserve_job(conn: &mut PgConnection, job_types: &[&str]) -> JobQueueResult<Option<Job>> {
    let now = now();

    conn.transaction(|conn| {
        let next: Option<Uuid> = jobs::table
            .filter(jobs::status.eq(JobStatus::Queued.as_str()))
            .filter(jobs::run_after.le(now))
            .filter(jobs::job_type.eq_any(job_types))
            .order((jobs::run_after.asc(), jobs::created_at.asc()))
            .select(jobs::id)
            .for_update()
            .skip_locked()
            .first(conn)
            .optional()?;

        let Some(id) = next else {
            return Ok(None);
        };

        let job = diesel::update(jobs::table.find(id))
            .set((
                jobs::status.eq(JobStatus::Processing.as_str()),
                jobs::attempts.eq(jobs::attempts + 1),
                jobs::updated_at.eq(now),
            ))
            .get_result(conn)?;
        Ok(Some(job))
    })
}

/// Records the final outcome of a job.
pub fn finish_job(
    conn: &mut PgConnection,
    job_id: Uuid,
    status: JobStatus,
    error_message: Option<&str>,
) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(status.as_str()),
            jobs::last_error.eq(error_message),
            jobs::updated_at.eq(now()),
        ))
        .execute(conn)?;
    Ok(())
}

/// Puts a job back in the queue, ready again after `delay`.
pub fn reschedule_job(
    conn: &mut PgConnection,
    job_id: Uuid,
    delay: Duration,
    error_message: &str,
) -> JobQueueResult<()> {
    let delay = ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(30));
    let now = now();

    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(JobStatus::Queued.as_str()),
            jobs::run_after.eq(now + delay),
            jobs::last_error.eq(Some(error_message)),
            jobs::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

/// Exponential backoff for a job that has been attempted `attempts` times.
pub fn backoff_for(attempts: i32) -> Duration {
    let exponent = attempts.clamp(1, 8) as u32 - 1;
    Duration::from_secs(30 * 2u64.pow(exponent))
}
