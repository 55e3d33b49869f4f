//! Chunk enrichment: analysis, contextual summary, embedding.
//!
//! Each chunk passes through three sub-operations, all idempotent with
//! respect to `(document_id, chunk_index)`:
//!
//! 1. **Analyze** — structured JSON analysis from the chat model; hard
//!    failure after the retry budget.
//! 2. **Contextualize** — optional situating summary; soft failure.
//! 3. **Embed** — vector over `context ⊕ "\n\n" ⊕ text` (or text alone);
//!    hard failure marks `embedding_status = failed` but leaves the chunk
//!    eligible for relational storage.
//!
//! Chunks of one document are enriched with bounded parallelism; ordering
//! between chunks is not guaranteed, every result carries its index.

pub mod analysis;
pub mod context;
pub mod embed;

use std::sync::Arc;

use futures_util::Stream;
use futures_util::stream::{self, StreamExt};

use crate::error::CorpusError;
use crate::llm::{ChatModel, EmbeddingModel, RetryPolicy};
use crate::model::{Chunk, ChunkStatus, EmbeddingStatus, EnrichedChunk};

pub use context::{DOCUMENT_PREVIEW_CHARS, preview_of};

#[derive(Debug, Clone)]
pub struct EnrichOptions {
    /// Compute contextual summaries before embedding.
    pub contextual_embeddings: bool,
    /// In-flight chunks per document.
    pub parallelism: usize,
    /// Attempt budget for analyze and embed.
    pub max_attempts: u32,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            contextual_embeddings: true,
            parallelism: 3,
            max_attempts: 3,
        }
    }
}

pub struct Enricher {
    chat: Arc<dyn ChatModel>,
    embedder: Arc<dyn EmbeddingModel>,
    options: EnrichOptions,
}

impl Enricher {
    pub fn new(
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingModel>,
        options: EnrichOptions,
    ) -> Self {
        Self {
            chat,
            embedder,
            options,
        }
    }

    pub fn options(&self) -> &EnrichOptions {
        &self.options
    }

    /// Enrich a single chunk. The returned error, if any, is the hard
    /// failure that left the chunk partially enriched; the chunk itself is
    /// always returned so callers can persist whatever survived.
    pub async fn enrich_chunk(
        &self,
        document_preview: Option<&str>,
        chunk: Chunk,
    ) -> (EnrichedChunk, Option<CorpusError>) {
        let mut enriched = EnrichedChunk::pending(chunk);

        match analysis::analyze(
            self.chat.as_ref(),
            &enriched.chunk.text,
            self.options.max_attempts,
        )
        .await
        {
            Ok(result) => {
                enriched.analysis = Some(result);
                enriched.status = ChunkStatus::Analyzed;
            }
            Err(err) => {
                tracing::warn!(
                    target: "millstone::enrich",
                    document_id = %enriched.chunk.document_id,
                    chunk_index = enriched.chunk.index,
                    error = %err,
                    "chunk analysis failed"
                );
                enriched.status = ChunkStatus::Failed;
                enriched.embedding_status = EmbeddingStatus::Failed;
                return (enriched, Some(err));
            }
        }

        if self.options.contextual_embeddings {
            if let Some(preview) = document_preview {
                enriched.contextual_summary =
                    context::contextualize(self.chat.as_ref(), preview, &enriched.chunk.text).await;
            }
        }

        let (input, contextual) = embed::build_embed_input(
            enriched.contextual_summary.as_deref(),
            &enriched.chunk.text,
        );
        enriched.uses_contextual_embedding = contextual;

        let policy = RetryPolicy {
            max_attempts: self.options.max_attempts,
            ..Default::default()
        };
        match embed::embed_input(self.embedder.as_ref(), policy, &input).await {
            Ok(vector) => {
                enriched.embedding = Some(vector);
                enriched.embedding_status = EmbeddingStatus::Completed;
                enriched.status = ChunkStatus::Embedded;
                (enriched, None)
            }
            Err(err) => {
                tracing::warn!(
                    target: "millstone::enrich",
                    document_id = %enriched.chunk.document_id,
                    chunk_index = enriched.chunk.index,
                    error = %err,
                    "chunk embedding failed"
                );
                enriched.embedding_status = EmbeddingStatus::Failed;
                (enriched, Some(err))
            }
        }
    }

    /// Enrich many chunks with bounded parallelism. Completion order is
    /// arbitrary; consumers key off `chunk.index`.
    pub fn enrich_all<'a>(
        &'a self,
        document_preview: Option<String>,
        chunks: Vec<Chunk>,
    ) -> impl Stream<Item = (EnrichedChunk, Option<CorpusError>)> + 'a {
        let preview: Option<Arc<str>> = document_preview.map(Arc::from);
        stream::iter(chunks)
            .map(move |chunk| {
                let preview = preview.clone();
                async move { self.enrich_chunk(preview.as_deref(), chunk).await }
            })
            .buffer_unordered(self.options.parallelism.max(1))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::model::ChunkingMethod;

    struct ScriptedChat {
        reply: String,
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn complete(&self, _: &str, _: &str, _: u32) -> Result<String, CorpusError> {
            Ok(self.reply.clone())
        }
    }

    struct BrokenChat;

    #[async_trait]
    impl ChatModel for BrokenChat {
        async fn complete(&self, _: &str, _: &str, _: u32) -> Result<String, CorpusError> {
            Err(CorpusError::Upstream("llm offline".into()))
        }
    }

    struct FixedEmbedder {
        dims: usize,
    }

    #[async_trait]
    impl EmbeddingModel for FixedEmbedder {
        async fn embed(&self, _: &str) -> Result<Vec<f32>, CorpusError> {
            Ok(vec![0.5; self.dims])
        }

        fn dimensions(&self) -> usize {
            self.dims
        }
    }

    fn chunk(text: &str) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            index: 0,
            start: 0,
            end: text.len(),
            text: text.to_string(),
            method: ChunkingMethod::Semantic,
            boundary: None,
            section_title: None,
            section_level: None,
            target_size: 2000,
            overlap: 200,
        }
    }

    fn fast_options() -> EnrichOptions {
        EnrichOptions {
            contextual_embeddings: false,
            parallelism: 3,
            max_attempts: 1,
        }
    }

    #[tokio::test]
    async fn full_enrichment_reaches_embedded() {
        let enricher = Enricher::new(
            Arc::new(ScriptedChat {
                reply: r#"{"title":"T","summary":"S"}"#.into(),
            }),
            Arc::new(FixedEmbedder { dims: 4 }),
            fast_options(),
        );
        let (enriched, err) = enricher.enrich_chunk(None, chunk("hello world")).await;
        assert!(err.is_none());
        assert_eq!(enriched.status, ChunkStatus::Embedded);
        assert_eq!(enriched.embedding_status, EmbeddingStatus::Completed);
        assert_eq!(enriched.embedding.as_ref().unwrap().len(), 4);
        assert!(!enriched.uses_contextual_embedding);
    }

    #[tokio::test]
    async fn analysis_outage_fails_the_chunk_softly() {
        let enricher = Enricher::new(
            Arc::new(BrokenChat),
            Arc::new(FixedEmbedder { dims: 4 }),
            fast_options(),
        );
        let (enriched, err) = enricher.enrich_chunk(None, chunk("hello")).await;
        assert!(matches!(err, Some(CorpusError::AnalysisFailed { .. })));
        assert_eq!(enriched.status, ChunkStatus::Failed);
        assert_eq!(enriched.embedding_status, EmbeddingStatus::Failed);
        assert!(enriched.embedding.is_none());
    }

    #[tokio::test]
    async fn bounded_stream_enriches_every_chunk() {
        let enricher = Enricher::new(
            Arc::new(ScriptedChat {
                reply: r#"{"title":"T"}"#.into(),
            }),
            Arc::new(FixedEmbedder { dims: 4 }),
            fast_options(),
        );
        let chunks: Vec<Chunk> = (0..7)
            .map(|i| {
                let mut c = chunk("body text");
                c.index = i;
                c
            })
            .collect();
        let results: Vec<_> = enricher.enrich_all(None, chunks).collect().await;
        assert_eq!(results.len(), 7);
        let mut indices: Vec<usize> = results.iter().map(|(c, _)| c.chunk.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..7).collect::<Vec<_>>());
    }
}
