//! Triple-write fan-out with partial-failure tolerance.
//!
//! Per chunk: the relational write is mandatory (with a short in-place
//! retry), vector and lexical writes are logged-and-skipped on failure.
//! A chunk is marked `stored` only when the relational write landed;
//! `embedding_status` downgrades to `failed` when the vector write did
//! not. [`FanoutTotals`] accumulates per-document counts and answers the
//! completion gate: all relational writes ok, at least 90 % of chunks in
//! the vector store, lexical index present.

use std::sync::Arc;
use std::time::Duration;

use crate::error::CorpusError;
use crate::model::{ChunkStatus, Document, EnrichedChunk};
use crate::stores::ContentStore;

const RELATIONAL_RETRIES: &[Duration] = &[Duration::from_millis(100), Duration::from_millis(400)];

/// Per-chunk outcome across the three stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkWrite {
    pub relational_ok: bool,
    pub vector_ok: bool,
    pub lexical_ok: bool,
}

/// Running per-document totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutTotals {
    pub chunks: usize,
    pub relational_ok: usize,
    pub vector_ok: usize,
    pub lexical_ok: usize,
    /// The lexical index was created for this document.
    pub lexical_ready: bool,
}

impl FanoutTotals {
    pub fn record(&mut self, write: ChunkWrite) {
        self.chunks += 1;
        if write.relational_ok {
            self.relational_ok += 1;
        }
        if write.vector_ok {
            self.vector_ok += 1;
        }
        if write.lexical_ok {
            self.lexical_ok += 1;
        }
    }

    /// Completion gate for a document's storage phase.
    pub fn completion_met(&self) -> bool {
        self.chunks > 0
            && self.relational_ok == self.chunks
            && self.vector_ok * 10 >= self.chunks * 9
            && (self.lexical_ready || self.lexical_ok > 0)
    }

    /// Chunks that missed the mandatory store.
    pub fn relational_failures(&self) -> usize {
        self.chunks - self.relational_ok
    }
}

/// The three adapters, fan-out policy applied.
pub struct StoreFanout {
    relational: Arc<dyn ContentStore>,
    vector: Arc<dyn ContentStore>,
    lexical: Arc<dyn ContentStore>,
}

impl StoreFanout {
    pub fn new(
        relational: Arc<dyn ContentStore>,
        vector: Arc<dyn ContentStore>,
        lexical: Arc<dyn ContentStore>,
    ) -> Self {
        Self {
            relational,
            vector,
            lexical,
        }
    }

    pub fn relational(&self) -> &Arc<dyn ContentStore> {
        &self.relational
    }

    /// Establish the document across the stores. The relational record is
    /// mandatory; the lexical index creation is best-effort and reported
    /// back so the completion gate can account for it.
    pub async fn begin_document(&self, document: &Document) -> Result<bool, CorpusError> {
        self.relational.upsert_document(document).await?;
        if let Err(err) = self.vector.upsert_document(document).await {
            tracing::warn!(
                target: "millstone::stores",
                document_id = %document.id,
                error = %err,
                "vector store unavailable at document start"
            );
        }
        match self.lexical.upsert_document(document).await {
            Ok(()) => Ok(true),
            Err(err) => {
                tracing::warn!(
                    target: "millstone::stores",
                    document_id = %document.id,
                    error = %err,
                    "lexical index not created"
                );
                Ok(false)
            }
        }
    }

    /// Refresh the relational document record (status transitions).
    pub async fn update_document(&self, document: &Document) -> Result<(), CorpusError> {
        self.relational.upsert_document(document).await
    }

    /// Write one chunk to all three stores under the fan-out policy. The
    /// chunk's statuses are updated in place to reflect what actually
    /// landed.
    pub async fn write_chunk(&self, chunk: &mut EnrichedChunk) -> ChunkWrite {
        let mut write = ChunkWrite::default();

        if chunk.embedding.is_some() {
            match self.vector.upsert_chunk(chunk).await {
                Ok(()) => write.vector_ok = true,
                Err(err) => {
                    tracing::warn!(
                        target: "millstone::stores",
                        document_id = %chunk.chunk.document_id,
                        chunk_index = chunk.chunk.index,
                        error = %err,
                        "vector write skipped"
                    );
                    chunk.embedding_status = crate::model::EmbeddingStatus::Failed;
                }
            }
        }

        if chunk.status != ChunkStatus::Failed {
            match self.lexical.upsert_chunk(chunk).await {
                Ok(()) => write.lexical_ok = true,
                Err(err) => {
                    tracing::warn!(
                        target: "millstone::stores",
                        document_id = %chunk.chunk.document_id,
                        chunk_index = chunk.chunk.index,
                        error = %err,
                        "lexical write skipped"
                    );
                }
            }
        }

        // Mandatory write, recorded last so the row carries final statuses.
        let previous_status = chunk.status;
        if chunk.status != ChunkStatus::Failed {
            chunk.status = ChunkStatus::Stored;
        }
        let mut attempt = 0usize;
        loop {
            match self.relational.upsert_chunk(chunk).await {
                Ok(()) => {
                    write.relational_ok = true;
                    break;
                }
                Err(err) if err.is_retriable() && attempt < RELATIONAL_RETRIES.len() => {
                    tokio::time::sleep(RELATIONAL_RETRIES[attempt]).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(
                        target: "millstone::stores",
                        document_id = %chunk.chunk.document_id,
                        chunk_index = chunk.chunk.index,
                        error = %err,
                        "relational write failed; chunk not stored"
                    );
                    chunk.status = if previous_status == ChunkStatus::Failed {
                        previous_status
                    } else {
                        ChunkStatus::Failed
                    };
                    break;
                }
            }
        }
        write
    }
}
