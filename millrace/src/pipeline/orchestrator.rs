//! Per-job pipeline: fetch → chunk → enrich → triple-store → finalize.
//!
//! Cancellation is observed before each stage and between chunks;
//! in-flight network calls finish but their results are discarded once
//! the flag is set. A soft deadline of `max(5 min, 2s·total_chunks)`
//! forces `job_timeout`. Failure accounting: a chunk counts as failed
//! when enrichment hard-failed or the mandatory relational write did
//! not land; documents finish `completed` only under the 10 % failure
//! budget with at least one stored chunk and the store fan-out gate met.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::StreamExt;
use millstone::chunker::Chunker;
use millstone::enrich::{EnrichOptions, Enricher, preview_of};
use millstone::llm::{ChatModel, EmbeddingModel};
use millstone::model::{Document, DocumentStatus, UploadOrigin};
use millstone::stores::{FanoutTotals, StoreFanout};
use serde_json::json;
use tokio::time::Instant;
use tracing::instrument;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::pipeline::fetch::{ContentFetcher, FETCH_TIMEOUT};
use crate::progress::{ProgressEvent, ProgressHub, ProgressKind};
use crate::queue::{Job, JobQueue};
use crate::sessions::{SessionRegistry, SessionStatus};

/// Throttle for `progress` events: emit when 5 chunks accumulated or
/// 250 ms elapsed, whichever comes first.
struct ProgressThrottle {
    last_emit: Instant,
    pending: usize,
}

impl ProgressThrottle {
    fn new() -> Self {
        Self {
            last_emit: Instant::now(),
            pending: 0,
        }
    }

    fn should_emit(&mut self) -> bool {
        self.pending += 1;
        if self.pending >= 5 || self.last_emit.elapsed() >= Duration::from_millis(250) {
            self.pending = 0;
            self.last_emit = Instant::now();
            true
        } else {
            false
        }
    }
}

/// Everything one pipeline run needs, injected explicitly.
pub struct PipelineDeps {
    pub queue: JobQueue,
    pub sessions: Arc<SessionRegistry>,
    pub hub: Arc<ProgressHub>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub chat: Arc<dyn ChatModel>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub fanout: Arc<StoreFanout>,
    pub config: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        document_id: Uuid,
        total_chunks: usize,
        stored_chunks: usize,
    },
    Cancelled,
}

pub struct Orchestrator {
    deps: Arc<PipelineDeps>,
}

impl Orchestrator {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    fn publish(&self, session_id: Uuid, job_id: Uuid, kind: ProgressKind, payload: serde_json::Value) {
        self.deps
            .hub
            .publish(ProgressEvent::new(session_id, Some(job_id), kind, payload));
    }

    /// Drive one claimed job to a terminal outcome. `Err` means the job
    /// failed; the worker decides retry vs terminal failure through the
    /// queue. `Ok(Cancelled)` means the run unwound cooperatively.
    #[instrument(skip(self, job), fields(job_id = %job.id, session_id = %job.session_id), err)]
    pub async fn run(&self, job: &Job) -> Result<JobOutcome, PipelineError> {
        let started = Instant::now();
        let session_id = job.session_id;
        let cancel = self.deps.sessions.cancel_flag(session_id);

        // Retried documents keep their id so upserts converge.
        let document_id = self
            .deps
            .sessions
            .get(session_id)
            .await?
            .and_then(|s| s.document_id)
            .unwrap_or_else(Uuid::new_v4);

        let origin = match &job.payload {
            crate::queue::JobPayload::Url { .. } => UploadOrigin::Url,
            crate::queue::JobPayload::File { .. } => UploadOrigin::FileUpload,
        };
        let mut document = Document::new(
            job.payload.source_label().to_string(),
            job.payload.source_url(),
            origin,
        )
        .with_id(document_id)
        .with_status(DocumentStatus::Fetching);

        self.deps.fanout.update_document(&document).await?;
        self.deps.sessions.set_document(session_id, document_id).await?;
        self.publish(
            session_id,
            job.id,
            ProgressKind::Started,
            json!({ "document_id": document_id, "attempt": job.attempts }),
        );

        if cancel.load(Ordering::SeqCst) {
            return self.unwind_cancelled(job, document).await;
        }

        // Fetch/extract through the boundary.
        let fetched = tokio::time::timeout(FETCH_TIMEOUT, self.deps.fetcher.fetch(&job.payload))
            .await
            .map_err(|_| PipelineError::UpstreamUnavailable("fetch timed out".into()))
            .and_then(|inner| inner);
        let fetched = match fetched {
            Ok(content) => content,
            Err(err) => {
                self.mark_failed(&mut document).await;
                return Err(err);
            }
        };
        if let Some(title) = fetched.title.clone() {
            document.title = title;
        }

        if cancel.load(Ordering::SeqCst) {
            return self.unwind_cancelled(job, document).await;
        }

        // Chunk.
        document = document.with_status(DocumentStatus::Chunking);
        self.deps.fanout.update_document(&document).await?;

        let chunker = Chunker::new(job.options.chunker_options());
        let outcome = match chunker.chunk(&fetched.text, document_id) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.mark_failed(&mut document).await;
                return Err(err.into());
            }
        };
        if outcome.chunks.is_empty() {
            self.mark_failed(&mut document).await;
            return Err(PipelineError::InvalidInput("no_content".into()));
        }

        let total_chunks = outcome.chunks.len();
        document.document_type = Some(outcome.document_kind);
        document.total_chunks = Some(total_chunks as u32);
        document = document.with_status(DocumentStatus::Enriching);

        let lexical_ready = self.deps.fanout.begin_document(&document).await?;
        self.deps
            .sessions
            .update_progress(session_id, 0, Some(total_chunks as i32))
            .await?;
        self.publish(
            session_id,
            job.id,
            ProgressKind::ChunkCreated,
            json!({ "total_chunks": total_chunks }),
        );

        if cancel.load(Ordering::SeqCst) {
            return self.unwind_cancelled(job, document).await;
        }

        // Enrich and store with bounded parallelism.
        let deadline = self.deps.config.job_deadline(total_chunks);
        let enricher = Enricher::new(
            Arc::clone(&self.deps.chat),
            Arc::clone(&self.deps.embedder),
            EnrichOptions {
                contextual_embeddings: job.options.contextual_embeddings,
                parallelism: self.deps.config.chunk_parallelism,
                max_attempts: 3,
            },
        );
        let preview = preview_of(&outcome.cleaned).to_string();

        let mut totals = FanoutTotals {
            lexical_ready,
            ..Default::default()
        };
        let mut failed_chunks = 0usize;
        let mut stored_chunks = 0usize;
        let mut processed = 0usize;
        let mut throttle = ProgressThrottle::new();

        {
            let mut stream =
                std::pin::pin!(enricher.enrich_all(Some(preview), outcome.chunks));
            while let Some((mut enriched, enrich_err)) = stream.next().await {
                if cancel.load(Ordering::SeqCst) {
                    // In-flight enrichment futures are dropped with the
                    // stream; their results are discarded.
                    return self.unwind_cancelled(job, document).await;
                }
                if started.elapsed() > deadline {
                    self.mark_failed(&mut document).await;
                    return Err(PipelineError::JobTimeout);
                }

                enriched.source_url = document.source_url.clone();
                let index = enriched.chunk.index;
                if enriched.analysis.is_some() {
                    self.publish(
                        session_id,
                        job.id,
                        ProgressKind::ChunkAnalyzed,
                        json!({ "chunk_index": index }),
                    );
                }
                if enriched.embedding.is_some() {
                    self.publish(
                        session_id,
                        job.id,
                        ProgressKind::ChunkEmbedded,
                        json!({ "chunk_index": index }),
                    );
                }

                let write = self.deps.fanout.write_chunk(&mut enriched).await;
                totals.record(write);
                if write.relational_ok
                    && enriched.status == millstone::model::ChunkStatus::Stored
                {
                    stored_chunks += 1;
                    self.publish(
                        session_id,
                        job.id,
                        ProgressKind::ChunkStored,
                        json!({ "chunk_index": index }),
                    );
                }
                if enrich_err.is_some() || !write.relational_ok {
                    failed_chunks += 1;
                }

                processed += 1;
                self.deps
                    .sessions
                    .update_progress(session_id, processed as i32, None)
                    .await?;
                if throttle.should_emit() {
                    self.publish(
                        session_id,
                        job.id,
                        ProgressKind::Progress,
                        json!({
                            "processed_chunks": processed,
                            "total_chunks": total_chunks,
                            "failed_chunks": failed_chunks,
                        }),
                    );
                }
            }
        }

        // Finalize under the failure budget.
        let within_budget = failed_chunks * 10 <= total_chunks;
        if within_budget && stored_chunks > 0 && totals.completion_met() {
            let now = chrono::Utc::now();
            document.status = DocumentStatus::Completed;
            document.updated_at = now;
            document.completed_at = Some(now);
            self.deps.fanout.update_document(&document).await?;
            self.deps
                .sessions
                .finish(session_id, SessionStatus::Completed, None)
                .await?;
            self.publish(
                session_id,
                job.id,
                ProgressKind::Completed,
                json!({
                    "document_id": document_id,
                    "total_chunks": total_chunks,
                    "stored_chunks": stored_chunks,
                    "failed_chunks": failed_chunks,
                }),
            );
            self.deps.hub.close_topic(session_id);
            tracing::info!(
                target: "millrace::pipeline",
                document_id = %document_id,
                total_chunks,
                stored_chunks,
                "document completed"
            );
            Ok(JobOutcome::Completed {
                document_id,
                total_chunks,
                stored_chunks,
            })
        } else {
            let reason = if !within_budget {
                format!("enrichment_failures: {failed_chunks}/{total_chunks}")
            } else if stored_chunks == 0 {
                "no_chunks_stored".to_string()
            } else {
                "storage_failures".to_string()
            };
            self.mark_failed(&mut document).await;
            Err(PipelineError::UpstreamUnavailable(reason))
        }
    }

    /// Best-effort terminal document record; the job/session terminal
    /// transitions belong to the queue once the error propagates.
    async fn mark_failed(&self, document: &mut Document) {
        document.status = DocumentStatus::Failed;
        document.updated_at = chrono::Utc::now();
        if let Err(err) = self.deps.fanout.update_document(document).await {
            tracing::error!(
                target: "millrace::pipeline",
                document_id = %document.id,
                error = %err,
                "could not record document failure"
            );
        }
    }

    async fn unwind_cancelled(
        &self,
        job: &Job,
        mut document: Document,
    ) -> Result<JobOutcome, PipelineError> {
        document.status = DocumentStatus::Cancelled;
        document.updated_at = chrono::Utc::now();
        if let Err(err) = self.deps.fanout.update_document(&document).await {
            tracing::warn!(
                target: "millrace::pipeline",
                document_id = %document.id,
                error = %err,
                "could not record document cancellation"
            );
        }
        self.deps
            .sessions
            .finish(job.session_id, SessionStatus::Cancelled, None)
            .await?;
        self.publish(
            job.session_id,
            job.id,
            ProgressKind::Cancelled,
            json!({ "document_id": document.id }),
        );
        self.deps.hub.close_topic(job.session_id);
        tracing::info!(
            target: "millrace::pipeline",
            job_id = %job.id,
            "job unwound after cancellation"
        );
        Ok(JobOutcome::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn throttle_emits_on_count_or_elapsed() {
        let mut throttle = ProgressThrottle::new();
        // Four quick chunks stay pending; the fifth forces an emit.
        for _ in 0..4 {
            assert!(!throttle.should_emit());
        }
        assert!(throttle.should_emit());

        // A single chunk after 250ms of quiet also emits.
        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(throttle.should_emit());
    }
}
