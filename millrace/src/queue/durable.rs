//! The durable queue over `background_jobs`.
//!
//! FIFO within priority (`ORDER BY priority ASC, created_at ASC`). Claims
//! take a row lock with `FOR UPDATE SKIP LOCKED` so any number of workers
//! can poll concurrently and a given job is only ever held by one of
//! them. Enqueue writes the job and its session in a single transaction;
//! the startup sweep converges the claim invariant after a crash.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use crate::config::ResolvedIngestOptions;
use crate::errors::{PipelineError, db_err};
use crate::queue::job::{
    DEFAULT_MAX_ATTEMPTS, Job, JobPayload, JobStatus, JobType, retry_backoff,
};

/// Filter and pagination for the job listing surface.
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub session_id: Option<Uuid>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total_count: u64,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still queued or claimed and is now cancelled.
    Cancelled,
    /// The job is running; the session flag is set and the pipeline will
    /// unwind at its next checkpoint.
    Unwinding,
    /// Already in a terminal state.
    AlreadyTerminal,
}

#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the job and its session atomically.
    #[instrument(skip(self, payload, options), fields(job_type = payload.job_type().as_str()), err)]
    pub async fn enqueue(
        &self,
        payload: JobPayload,
        options: ResolvedIngestOptions,
    ) -> Result<(Uuid, Uuid), PipelineError> {
        let job_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let payload_json = serde_json::to_value(&payload)
            .map_err(|e| PipelineError::InvalidInput(format!("payload: {e}")))?;
        let options_json = serde_json::to_value(&options)
            .map_err(|e| PipelineError::InvalidInput(format!("options: {e}")))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            r#"
            INSERT INTO upload_sessions (session_id, job_id, status, url)
            VALUES ($1, $2, 'queued', $3)
            "#,
        )
        .bind(session_id)
        .bind(job_id)
        .bind(payload.source_url())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO background_jobs (
                id, session_id, job_type, payload, options, status,
                priority, attempts, max_attempts, next_retry_at
            ) VALUES ($1, $2, $3, $4, $5, 'queued', $6, 0, $7, now())
            "#,
        )
        .bind(job_id)
        .bind(session_id)
        .bind(payload.job_type().as_str())
        .bind(payload_json)
        .bind(options_json)
        .bind(options.priority)
        .bind(DEFAULT_MAX_ATTEMPTS)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        tracing::info!(
            target: "millrace::queue",
            job_id = %job_id,
            session_id = %session_id,
            "job enqueued"
        );
        Ok((job_id, session_id))
    }

    /// Claim the next due job for `worker_id`, if any. Atomic: the row is
    /// locked, skipped by concurrent claimers, and marked `claimed` before
    /// the lock releases.
    #[instrument(skip(self), err)]
    pub async fn claim(&self, worker_id: &str) -> Result<Option<Job>, PipelineError> {
        let row = sqlx::query(
            r#"
            WITH next_job AS (
                SELECT id FROM background_jobs
                WHERE status = 'queued' AND next_retry_at <= now()
                ORDER BY priority ASC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE background_jobs j
            SET status = 'claimed', claimed_by = $1, updated_at = now()
            FROM next_job
            WHERE j.id = next_job.id
            RETURNING j.id, j.session_id, j.job_type, j.payload, j.options, j.status,
                      j.priority, j.attempts, j.max_attempts, j.next_retry_at,
                      j.claimed_by, j.error, j.created_at, j.updated_at, j.completed_at
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| job_from_row(&r)).transpose()
    }

    /// Transition a claimed job to `running` and its session to
    /// `processing`.
    #[instrument(skip(self), err)]
    pub async fn mark_running(&self, job_id: Uuid) -> Result<(), PipelineError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            "UPDATE background_jobs SET status = 'running', updated_at = now() WHERE id = $1 AND status = 'claimed'",
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = 'processing', last_heartbeat = now(), updated_at = now()
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)
    }

    /// Refresh the session heartbeat for a running job.
    pub async fn heartbeat(&self, job_id: Uuid) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            UPDATE upload_sessions
            SET last_heartbeat = now(), updated_at = now()
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Mark a job `succeeded`. Replaying `complete` on an already
    /// succeeded job is a no-op.
    #[instrument(skip(self, result), err)]
    pub async fn complete(
        &self,
        job_id: Uuid,
        result: serde_json::Value,
    ) -> Result<(), PipelineError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            r#"
            UPDATE background_jobs
            SET status = 'succeeded', error = NULL, updated_at = now(),
                completed_at = COALESCE(completed_at, now()),
                payload = payload || jsonb_build_object('result', $2::jsonb)
            WHERE id = $1 AND status NOT IN ('succeeded', 'cancelled')
            "#,
        )
        .bind(job_id)
        .bind(result)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = 'completed', updated_at = now()
            WHERE job_id = $1 AND status IN ('queued', 'processing')
            "#,
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)
    }

    /// Record a failure: reschedule when attempts remain and the error is
    /// retriable, otherwise fail terminally (session included).
    #[instrument(skip(self, error), fields(kind = error.kind()), err)]
    pub async fn fail(&self, job_id: Uuid, error: &PipelineError) -> Result<JobStatus, PipelineError> {
        let row = sqlx::query(
            "SELECT attempts, max_attempts FROM background_jobs WHERE id = $1 AND status IN ('claimed', 'running')",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        let Some(row) = row else {
            return Err(PipelineError::NotFound(format!("active job {job_id}")));
        };
        let attempts: i32 = row.get("attempts");
        let max_attempts: i32 = row.get("max_attempts");
        let next_attempt = attempts + 1;
        let envelope = serde_json::to_value(error.envelope())
            .unwrap_or_else(|_| serde_json::json!({ "kind": error.kind() }));

        if error.is_retriable() && next_attempt < max_attempts {
            let delay = retry_backoff(attempts);
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            sqlx::query(
                r#"
                UPDATE background_jobs
                SET status = 'queued', attempts = $2, error = $3,
                    claimed_by = NULL, next_retry_at = now() + $4::interval,
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(next_attempt)
            .bind(&envelope)
            .bind(format!("{} milliseconds", delay.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            // The session leaves `processing` with the job, or the stale
            // sweep would reap it while the retry waits.
            sqlx::query(
                "UPDATE upload_sessions SET status = 'queued', updated_at = now() WHERE job_id = $1",
            )
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            tracing::warn!(
                target: "millrace::queue",
                job_id = %job_id,
                attempt = next_attempt,
                delay_ms = delay.as_millis() as u64,
                "job requeued after failure"
            );
            Ok(JobStatus::Queued)
        } else {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            sqlx::query(
                r#"
                UPDATE background_jobs
                SET status = 'failed', attempts = $2, error = $3,
                    updated_at = now(), completed_at = now()
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(next_attempt)
            .bind(&envelope)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            sqlx::query(
                r#"
                UPDATE upload_sessions
                SET status = 'failed', error = $2, updated_at = now()
                WHERE job_id = $1
                "#,
            )
            .bind(job_id)
            .bind(error.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(JobStatus::Failed)
        }
    }

    /// Cancel by job id. Queued/claimed jobs cancel immediately; running
    /// jobs get their session flag set and unwind cooperatively.
    #[instrument(skip(self), err)]
    pub async fn cancel(&self, job_id: Uuid) -> Result<CancelOutcome, PipelineError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM background_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        let Some(status) = status else {
            return Err(PipelineError::NotFound(format!("job {job_id}")));
        };
        match JobStatus::parse(&status) {
            Some(JobStatus::Queued) | Some(JobStatus::Claimed) => {
                let mut tx = self.pool.begin().await.map_err(db_err)?;
                sqlx::query(
                    r#"
                    UPDATE background_jobs
                    SET status = 'cancelled', updated_at = now(), completed_at = now()
                    WHERE id = $1 AND status IN ('queued', 'claimed')
                    "#,
                )
                .bind(job_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                sqlx::query(
                    r#"
                    UPDATE upload_sessions
                    SET status = 'cancelled', cancel_requested = TRUE, updated_at = now()
                    WHERE job_id = $1
                    "#,
                )
                .bind(job_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                tx.commit().await.map_err(db_err)?;
                Ok(CancelOutcome::Cancelled)
            }
            Some(JobStatus::Running) => {
                sqlx::query(
                    "UPDATE upload_sessions SET cancel_requested = TRUE, updated_at = now() WHERE job_id = $1",
                )
                .bind(job_id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
                Ok(CancelOutcome::Unwinding)
            }
            _ => Ok(CancelOutcome::AlreadyTerminal),
        }
    }

    /// Batch cancel by session.
    #[instrument(skip(self), err)]
    pub async fn cancel_by_session(&self, session_id: Uuid) -> Result<CancelOutcome, PipelineError> {
        let job_id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM background_jobs WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        match job_id {
            Some(job_id) => self.cancel(job_id).await,
            None => Err(PipelineError::NotFound(format!("session {session_id}"))),
        }
    }

    /// Record that a running job unwound after a cancellation request.
    #[instrument(skip(self), err)]
    pub async fn mark_cancelled(&self, job_id: Uuid) -> Result<(), PipelineError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            r#"
            UPDATE background_jobs
            SET status = 'cancelled', updated_at = now(), completed_at = now()
            WHERE id = $1 AND status NOT IN ('succeeded', 'failed')
            "#,
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        sqlx::query(
            "UPDATE upload_sessions SET status = 'cancelled', updated_at = now() WHERE job_id = $1",
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)
    }

    /// Crash-recovery sweep: jobs stuck in `claimed`/`running` whose
    /// session heartbeat is older than `heartbeat_timeout` go back to the
    /// queue while attempts remain, else fail. Returns (requeued, failed).
    #[instrument(skip(self), err)]
    pub async fn sweep_stale(
        &self,
        heartbeat_timeout: std::time::Duration,
    ) -> Result<(u64, u64), PipelineError> {
        let cutoff_interval = format!("{} seconds", heartbeat_timeout.as_secs());
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let requeued = sqlx::query(
            r#"
            UPDATE background_jobs j
            SET status = 'queued', attempts = j.attempts + 1,
                claimed_by = NULL, next_retry_at = now(), updated_at = now()
            FROM upload_sessions s
            WHERE s.job_id = j.id
              AND j.status IN ('claimed', 'running')
              AND s.last_heartbeat < now() - $1::interval
              AND j.attempts + 1 < j.max_attempts
            "#,
        )
        .bind(&cutoff_interval)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        let failed = sqlx::query(
            r#"
            UPDATE background_jobs j
            SET status = 'failed', attempts = j.attempts + 1,
                error = jsonb_build_object('kind', 'heartbeat_timeout'),
                updated_at = now(), completed_at = now()
            FROM upload_sessions s
            WHERE s.job_id = j.id
              AND j.status IN ('claimed', 'running')
              AND s.last_heartbeat < now() - $1::interval
            "#,
        )
        .bind(&cutoff_interval)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        // Requeued jobs get their sessions back to queued; terminal ones
        // are handled by the session sweep.
        sqlx::query(
            r#"
            UPDATE upload_sessions s
            SET status = 'queued', updated_at = now()
            FROM background_jobs j
            WHERE s.job_id = j.id AND j.status = 'queued' AND s.status = 'processing'
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        if requeued > 0 || failed > 0 {
            tracing::info!(
                target: "millrace::queue",
                requeued,
                failed,
                "stale job sweep complete"
            );
        }
        Ok((requeued, failed))
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, PipelineError> {
        let row = sqlx::query(
            r#"
            SELECT id, session_id, job_type, payload, options, status, priority,
                   attempts, max_attempts, next_retry_at, claimed_by, error,
                   created_at, updated_at, completed_at
            FROM background_jobs WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| job_from_row(&r)).transpose()
    }

    /// Paginated job listing, newest first.
    #[instrument(skip(self), err)]
    pub async fn list_jobs(&self, query: JobQuery) -> Result<JobPage, PipelineError> {
        let limit = query.limit.unwrap_or(50).min(500);
        let offset = query.offset.unwrap_or(0);
        let status = query.status.map(|s| s.as_str());

        let total_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM background_jobs
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR session_id = $2)
            "#,
        )
        .bind(status)
        .bind(query.session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let rows = sqlx::query(
            r#"
            SELECT id, session_id, job_type, payload, options, status, priority,
                   attempts, max_attempts, next_retry_at, claimed_by, error,
                   created_at, updated_at, completed_at
            FROM background_jobs
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR session_id = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(status)
        .bind(query.session_id)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let jobs = rows
            .iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(JobPage {
            jobs,
            total_count: total_count as u64,
        })
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, PipelineError> {
    let status_raw: String = row.get("status");
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| PipelineError::FatalDatabase(format!("unknown job status '{status_raw}'")))?;
    let type_raw: String = row.get("job_type");
    let job_type = JobType::parse(&type_raw)
        .ok_or_else(|| PipelineError::FatalDatabase(format!("unknown job type '{type_raw}'")))?;
    let payload: JobPayload = serde_json::from_value(strip_result(row.get("payload")))
        .map_err(|e| PipelineError::FatalDatabase(format!("payload decode: {e}")))?;
    let options: ResolvedIngestOptions = serde_json::from_value(row.get("options"))
        .map_err(|e| PipelineError::FatalDatabase(format!("options decode: {e}")))?;

    Ok(Job {
        id: row.get("id"),
        session_id: row.get("session_id"),
        job_type,
        payload,
        options,
        status,
        priority: row.get("priority"),
        attempts: row.get("attempts"),
        max_attempts: row.get("max_attempts"),
        next_retry_at: row.get::<DateTime<Utc>, _>("next_retry_at"),
        claimed_by: row.get("claimed_by"),
        error: row.get("error"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        completed_at: row.get("completed_at"),
    })
}

/// `complete` folds a result object into the payload; the typed payload
/// decoder does not want it.
fn strip_result(mut payload: serde_json::Value) -> serde_json::Value {
    if let Some(object) = payload.as_object_mut() {
        object.remove("result");
    }
    payload
}
