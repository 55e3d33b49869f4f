//! Durable queue behavior against a live Postgres.
//!
//! These tests are ignored by default; point `DATABASE_URL` at a
//! **scratch** database and run with
//! `cargo test -- --ignored --test-threads=1`. Tables are truncated
//! between tests.

use std::time::Duration;

use sqlx::PgPool;

use millrace::config::ResolvedIngestOptions;
use millrace::errors::PipelineError;
use millrace::queue::{CancelOutcome, JobPayload, JobQueue, JobStatus};
use millrace::sessions::{SessionRegistry, SessionStatus};

async fn scratch_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch db");
    let pool = millrace::db::connect(&url).await.expect("connect");
    sqlx::query("TRUNCATE background_jobs, upload_sessions, processed_content")
        .execute(&pool)
        .await
        .expect("truncate");
    pool
}

fn url_payload(url: &str) -> JobPayload {
    JobPayload::Url {
        url: url.to_string(),
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn claim_is_exclusive_and_priority_ordered() {
    let queue = JobQueue::new(scratch_pool().await);
    let options = ResolvedIngestOptions::default();

    let (low_id, _) = queue
        .enqueue(
            url_payload("https://x/low"),
            ResolvedIngestOptions {
                priority: 100,
                ..options.clone()
            },
        )
        .await
        .unwrap();
    let (high_id, _) = queue
        .enqueue(
            url_payload("https://x/high"),
            ResolvedIngestOptions {
                priority: 1,
                ..options
            },
        )
        .await
        .unwrap();

    // Lower priority value wins despite being enqueued second.
    let first = queue.claim("w1").await.unwrap().unwrap();
    assert_eq!(first.id, high_id);
    assert_eq!(first.status, JobStatus::Claimed);
    assert_eq!(first.claimed_by.as_deref(), Some("w1"));

    let second = queue.claim("w2").await.unwrap().unwrap();
    assert_eq!(second.id, low_id);

    // Nothing left; a third claim comes back empty.
    assert!(queue.claim("w3").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn retriable_failure_requeues_with_backoff() {
    let queue = JobQueue::new(scratch_pool().await);
    let (job_id, _) = queue
        .enqueue(url_payload("https://x/a"), ResolvedIngestOptions::default())
        .await
        .unwrap();

    let job = queue.claim("w1").await.unwrap().unwrap();
    queue.mark_running(job.id).await.unwrap();

    let status = queue
        .fail(job.id, &PipelineError::UpstreamUnavailable("llm down".into()))
        .await
        .unwrap();
    assert_eq!(status, JobStatus::Queued);

    let stored = queue.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Queued);
    assert_eq!(stored.attempts, 1);
    assert!(stored.next_retry_at > chrono::Utc::now());
    assert!(stored.claimed_by.is_none());

    // Not due yet, so it cannot be claimed.
    assert!(queue.claim("w1").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn non_retriable_failure_is_terminal() {
    let pool = scratch_pool().await;
    let queue = JobQueue::new(pool.clone());
    let sessions = SessionRegistry::new(pool);
    let (job_id, session_id) = queue
        .enqueue(url_payload("https://x/a"), ResolvedIngestOptions::default())
        .await
        .unwrap();

    let job = queue.claim("w1").await.unwrap().unwrap();
    queue.mark_running(job.id).await.unwrap();

    let status = queue
        .fail(job.id, &PipelineError::InvalidInput("no_content".into()))
        .await
        .unwrap();
    assert_eq!(status, JobStatus::Failed);

    let stored = queue.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error.is_some());

    let session = sessions.get(session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn exhausted_attempts_fail_terminally() {
    let queue = JobQueue::new(scratch_pool().await);
    let (job_id, _) = queue
        .enqueue(url_payload("https://x/a"), ResolvedIngestOptions::default())
        .await
        .unwrap();
    let err = PipelineError::UpstreamUnavailable("still down".into());

    for expected_attempt in 1..=3 {
        // Make the retry immediately due, then claim and fail again.
        sqlx::query("UPDATE background_jobs SET next_retry_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(queue.pool())
            .await
            .unwrap();
        let job = queue.claim("w1").await.unwrap().unwrap();
        queue.mark_running(job.id).await.unwrap();
        let status = queue.fail(job.id, &err).await.unwrap();
        if expected_attempt < 3 {
            assert_eq!(status, JobStatus::Queued);
        } else {
            assert_eq!(status, JobStatus::Failed);
        }
        let stored = queue.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, expected_attempt);
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn complete_is_idempotent() {
    let queue = JobQueue::new(scratch_pool().await);
    let (job_id, _) = queue
        .enqueue(url_payload("https://x/a"), ResolvedIngestOptions::default())
        .await
        .unwrap();
    let job = queue.claim("w1").await.unwrap().unwrap();
    queue.mark_running(job.id).await.unwrap();

    let result = serde_json::json!({ "document_id": "d" });
    queue.complete(job_id, result.clone()).await.unwrap();
    queue.complete(job_id, result).await.unwrap();

    let stored = queue.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Succeeded);
    assert!(stored.completed_at.is_some());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn cancellation_paths() {
    let pool = scratch_pool().await;
    let queue = JobQueue::new(pool.clone());
    let sessions = SessionRegistry::new(pool);

    // Queued jobs cancel immediately.
    let (queued_id, queued_session) = queue
        .enqueue(url_payload("https://x/q"), ResolvedIngestOptions::default())
        .await
        .unwrap();
    assert_eq!(
        queue.cancel(queued_id).await.unwrap(),
        CancelOutcome::Cancelled
    );
    let session = sessions.get(queued_session).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);

    // Running jobs only get the flag; the pipeline unwinds on its own.
    let (running_id, running_session) = queue
        .enqueue(url_payload("https://x/r"), ResolvedIngestOptions::default())
        .await
        .unwrap();
    let job = queue.claim("w1").await.unwrap().unwrap();
    assert_eq!(job.id, running_id);
    queue.mark_running(running_id).await.unwrap();
    assert_eq!(
        queue.cancel_by_session(running_session).await.unwrap(),
        CancelOutcome::Unwinding
    );
    let session = sessions.get(running_session).await.unwrap().unwrap();
    assert!(session.cancel_requested);
    assert_eq!(session.status, SessionStatus::Processing);

    // Terminal jobs are left alone.
    queue.mark_cancelled(running_id).await.unwrap();
    assert_eq!(
        queue.cancel(running_id).await.unwrap(),
        CancelOutcome::AlreadyTerminal
    );
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn crash_sweep_converges_stale_claims() {
    let pool = scratch_pool().await;
    let queue = JobQueue::new(pool.clone());
    let sessions = SessionRegistry::new(pool.clone());
    let (job_id, session_id) = queue
        .enqueue(url_payload("https://x/a"), ResolvedIngestOptions::default())
        .await
        .unwrap();
    let job = queue.claim("w1").await.unwrap().unwrap();
    queue.mark_running(job.id).await.unwrap();

    // Simulate a crashed worker: the heartbeat goes stale.
    sqlx::query(
        "UPDATE upload_sessions SET last_heartbeat = now() - interval '10 minutes' WHERE session_id = $1",
    )
    .bind(session_id)
    .execute(&pool)
    .await
    .unwrap();

    let (requeued, failed) = queue
        .sweep_stale(Duration::from_secs(90))
        .await
        .unwrap();
    assert_eq!((requeued, failed), (1, 0));

    let stored = queue.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Queued);
    assert_eq!(stored.attempts, 1);

    // The session sweep finds nothing once the job is requeued.
    let reaped = sessions.sweep_stale(Duration::from_secs(90)).await.unwrap();
    assert_eq!(reaped, 0);

    // And the job is claimable again right away.
    let reclaimed = queue.claim("w2").await.unwrap().unwrap();
    assert_eq!(reclaimed.id, job_id);
}
