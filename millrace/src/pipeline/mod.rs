//! The per-job pipeline: fetcher boundary and orchestrator.

pub mod fetch;
pub mod orchestrator;

use uuid::Uuid;

use crate::config::ResolvedIngestOptions;
use crate::errors::PipelineError;
use crate::progress::{ProgressEvent, ProgressKind};
use crate::queue::JobPayload;

pub use fetch::{ContentFetcher, FETCH_TIMEOUT, FetchedContent, HttpTextFetcher};
pub use orchestrator::{JobOutcome, Orchestrator, PipelineDeps};

/// Enqueue an ingestion and announce it on the progress bus. This is what
/// the HTTP boundary calls once its options are validated.
pub async fn submit(
    deps: &PipelineDeps,
    payload: JobPayload,
    options: ResolvedIngestOptions,
) -> Result<(Uuid, Uuid), PipelineError> {
    let (job_id, session_id) = deps.queue.enqueue(payload, options).await?;
    deps.hub.publish(ProgressEvent::new(
        session_id,
        Some(job_id),
        ProgressKind::Queued,
        serde_json::json!({ "job_id": job_id }),
    ));
    Ok((job_id, session_id))
}
