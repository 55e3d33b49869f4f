//! Assemble the pipeline from configuration.
//!
//! The five injected collaborators (chat model, embedding model, and the
//! three store adapters) are constructed here and passed down as explicit
//! parameters; nothing resolves dependencies at a distance.

use std::sync::Arc;

use millstone::llm::openai::{OpenAiClient, OpenAiConfig};
use millstone::llm::{ChatModel, EmbeddingModel, TokenBucket};
use millstone::retrieve::HybridRetriever;
use millstone::stores::vector::VectorStoreConfig;
use millstone::stores::{LexicalStore, RelationalStore, StoreFanout, VectorStore};

use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::pipeline::{HttpTextFetcher, PipelineDeps};
use crate::progress::ProgressHub;
use crate::queue::JobQueue;
use crate::sessions::SessionRegistry;

/// Qdrant collection holding one point per chunk.
pub const CHUNK_COLLECTION: &str = "content_chunks";

/// Allowed burst of LLM calls above the sustained rate.
const LLM_BURST: u32 = 10;

pub struct Pipeline {
    pub deps: Arc<PipelineDeps>,
    pub retriever: HybridRetriever,
    pub relational: Arc<RelationalStore>,
}

/// Connect, migrate, and wire every layer from the resolved config.
pub async fn build(config: PipelineConfig) -> Result<Pipeline, PipelineError> {
    let pool = crate::db::connect(&config.database_url).await?;

    let limiter = TokenBucket::new(LLM_BURST, config.llm_rate_per_sec);
    let mut openai_config = OpenAiConfig::new(config.openai_api_key.clone())
        .with_dimensions(config.embedding_dimensions);
    if let Some(base_url) = &config.openai_base_url {
        openai_config = openai_config.with_base_url(base_url.clone());
    }
    let openai = Arc::new(OpenAiClient::new(openai_config, limiter)?);
    let chat: Arc<dyn ChatModel> = openai.clone();
    let embedder: Arc<dyn EmbeddingModel> = openai;

    let relational = Arc::new(RelationalStore::new(pool.clone()));
    let vector = Arc::new(VectorStore::new(
        VectorStoreConfig::new(
            config.qdrant_url.clone(),
            CHUNK_COLLECTION,
            config.embedding_dimensions,
        )
        .with_api_key(config.qdrant_api_key.clone()),
        Arc::clone(&embedder),
    )?);
    let lexical = Arc::new(LexicalStore::new(config.bm25_url.clone())?);

    let fanout = Arc::new(StoreFanout::new(
        relational.clone(),
        vector.clone(),
        lexical.clone(),
    ));
    let retriever = HybridRetriever::new(vector, lexical, relational.clone());

    let deps = Arc::new(PipelineDeps {
        queue: JobQueue::new(pool.clone()),
        sessions: SessionRegistry::new(pool),
        hub: ProgressHub::with_default_capacity(),
        fetcher: Arc::new(HttpTextFetcher::new()?),
        chat,
        embedder,
        fanout,
        config,
    });

    Ok(Pipeline {
        deps,
        retriever,
        relational,
    })
}
