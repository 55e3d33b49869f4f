//! Worker pool: claim, orchestrate, complete/fail, repeat.
//!
//! `W` workers poll the durable queue with a bounded sleep when it is
//! empty. Each claimed job runs in its own task so a panic becomes a job
//! failure instead of a dead worker, with a heartbeat ticker keeping the
//! session alive (and refreshing the cancellation flag) for the duration.
//! On shutdown the pool stops claiming and lets in-flight runs reach
//! their next checkpoint; queued and running jobs stay durable.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::pipeline::{JobOutcome, Orchestrator, PipelineDeps};
use crate::progress::{ProgressEvent, ProgressKind};
use crate::queue::{Job, JobStatus};
use crate::sessions::SessionStatus;

const POLL_SLEEP: Duration = Duration::from_millis(500);
const ERROR_SLEEP: Duration = Duration::from_secs(2);

pub struct WorkerPool;

pub struct WorkerPoolHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    sweeper: JoinHandle<()>,
}

impl WorkerPool {
    /// Run the crash-recovery sweep, then start the workers and the
    /// periodic sweeper.
    pub async fn start(deps: Arc<PipelineDeps>) -> Result<WorkerPoolHandle, PipelineError> {
        deps.queue.sweep_stale(deps.config.heartbeat_timeout).await?;
        deps.sessions
            .sweep_stale(deps.config.heartbeat_timeout)
            .await?;

        let (shutdown, _) = watch::channel(false);
        let workers = (0..deps.config.worker_count)
            .map(|worker_id| {
                let deps = Arc::clone(&deps);
                let shutdown_rx = shutdown.subscribe();
                tokio::spawn(worker_loop(worker_id, deps, shutdown_rx))
            })
            .collect();

        let sweeper = {
            let deps = Arc::clone(&deps);
            let mut shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                let interval = deps.config.heartbeat_timeout;
                loop {
                    tokio::select! {
                        _ = sleep(interval) => {
                            if let Err(err) = deps.queue.sweep_stale(deps.config.heartbeat_timeout).await {
                                tracing::error!(target: "millrace::workers", error = %err, "job sweep failed");
                            }
                            if let Err(err) = deps.sessions.sweep_stale(deps.config.heartbeat_timeout).await {
                                tracing::error!(target: "millrace::workers", error = %err, "session sweep failed");
                            }
                            if let Err(err) = deps.sessions.sweep_stuck(deps.config.session_timeout).await {
                                tracing::error!(target: "millrace::workers", error = %err, "stuck-session sweep failed");
                            }
                        }
                        _ = shutdown_rx.changed() => break,
                    }
                }
            })
        };

        tracing::info!(
            target: "millrace::workers",
            worker_count = deps.config.worker_count,
            "worker pool started"
        );
        Ok(WorkerPoolHandle {
            shutdown,
            workers,
            sweeper,
        })
    }
}

impl WorkerPoolHandle {
    /// Stop claiming and wait for in-flight jobs to unwind.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            let _ = worker.await;
        }
        self.sweeper.abort();
        tracing::info!(target: "millrace::workers", "worker pool drained");
    }

    /// Block until SIGTERM/ctrl-c, then drain.
    pub async fn run_until_signal(self) {
        wait_for_termination().await;
        tracing::info!(
            target: "millrace::workers",
            "termination signal received; draining workers"
        );
        self.shutdown().await;
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("sigterm handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn worker_loop(worker_id: usize, deps: Arc<PipelineDeps>, mut shutdown: watch::Receiver<bool>) {
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&deps)));
    let worker_name = format!("worker-{worker_id}");
    tracing::debug!(target: "millrace::workers", worker = %worker_name, "worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        match deps.queue.claim(&worker_name).await {
            Ok(Some(job)) => {
                process_job(&deps, Arc::clone(&orchestrator), job).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = sleep(POLL_SLEEP) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(err) => {
                tracing::error!(
                    target: "millrace::workers",
                    worker = %worker_name,
                    error = %err,
                    "claim failed"
                );
                tokio::select! {
                    _ = sleep(ERROR_SLEEP) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
    tracing::debug!(target: "millrace::workers", worker = %worker_name, "worker stopped");
}

async fn process_job(deps: &Arc<PipelineDeps>, orchestrator: Arc<Orchestrator>, job: Job) {
    if let Err(err) = deps.queue.mark_running(job.id).await {
        tracing::error!(
            target: "millrace::workers",
            job_id = %job.id,
            error = %err,
            "could not mark job running"
        );
        return;
    }

    // Heartbeat at most every H seconds; also refreshes the in-memory
    // cancellation flag from the durable one.
    let ticker = {
        let deps = Arc::clone(deps);
        let session_id = job.session_id;
        let interval = deps.config.heartbeat_interval;
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                if let Err(err) = deps.sessions.heartbeat(session_id).await {
                    tracing::warn!(
                        target: "millrace::workers",
                        session_id = %session_id,
                        error = %err,
                        "heartbeat failed"
                    );
                }
            }
        })
    };

    let run = {
        let job = job.clone();
        tokio::spawn(async move { orchestrator.run(&job).await })
    };
    let result = run.await;
    ticker.abort();

    match result {
        Ok(Ok(JobOutcome::Completed {
            document_id,
            total_chunks,
            stored_chunks,
        })) => {
            let result = json!({
                "document_id": document_id,
                "total_chunks": total_chunks,
                "stored_chunks": stored_chunks,
            });
            if let Err(err) = deps.queue.complete(job.id, result).await {
                tracing::error!(
                    target: "millrace::workers",
                    job_id = %job.id,
                    error = %err,
                    "could not record job completion"
                );
            }
        }
        Ok(Ok(JobOutcome::Cancelled)) => {
            if let Err(err) = deps.queue.mark_cancelled(job.id).await {
                tracing::error!(
                    target: "millrace::workers",
                    job_id = %job.id,
                    error = %err,
                    "could not record job cancellation"
                );
            }
        }
        Ok(Err(pipeline_err)) => {
            record_failure(deps, &job, pipeline_err).await;
        }
        Err(join_err) => {
            let err = if join_err.is_panic() {
                PipelineError::UpstreamUnavailable(format!("pipeline panicked: {join_err}"))
            } else {
                PipelineError::Cancelled
            };
            record_failure(deps, &job, err).await;
        }
    }
}

/// Route a failure through the queue's retry policy; only a terminal
/// failure emits the `failed` event and closes the session topic.
async fn record_failure(deps: &Arc<PipelineDeps>, job: &Job, err: PipelineError) {
    match deps.queue.fail(job.id, &err).await {
        Ok(JobStatus::Queued) => {
            tracing::warn!(
                target: "millrace::workers",
                job_id = %job.id,
                error = %err,
                "job failed; retry scheduled"
            );
        }
        Ok(_) => {
            let _ = deps
                .sessions
                .finish(job.session_id, SessionStatus::Failed, Some(&err.to_string()))
                .await;
            publish_terminal_failure(deps, job.session_id, job.id, &err);
        }
        Err(queue_err) => {
            tracing::error!(
                target: "millrace::workers",
                job_id = %job.id,
                error = %queue_err,
                "could not record job failure"
            );
            publish_terminal_failure(deps, job.session_id, job.id, &err);
        }
    }
}

fn publish_terminal_failure(deps: &Arc<PipelineDeps>, session_id: Uuid, job_id: Uuid, err: &PipelineError) {
    deps.hub.publish(ProgressEvent::new(
        session_id,
        Some(job_id),
        ProgressKind::Failed,
        json!({ "error": { "kind": err.kind(), "message": err.to_string() } }),
    ));
    deps.hub.close_topic(session_id);
}
