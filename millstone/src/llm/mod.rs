//! LLM and embedding client seams.
//!
//! The enrichment stage talks to two narrow traits so tests can substitute
//! deterministic models; the production implementation is the
//! OpenAI-compatible [`openai::OpenAiClient`]. All calls pass through a
//! shared token bucket so worker-level parallelism cannot stampede the API.

pub mod openai;
pub mod rate_limit;
mod retry;

use async_trait::async_trait;

use crate::error::CorpusError;

pub use rate_limit::TokenBucket;
pub use retry::{RetryPolicy, with_retries};

/// Chat-completion model used for analysis and contextual summaries.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One-shot completion: system prompt + user message, capped output.
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, CorpusError>;

    fn name(&self) -> &str {
        "chat"
    }
}

/// Embedding model producing fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, CorpusError>;

    /// Configured output dimensionality; every returned vector must match.
    fn dimensions(&self) -> usize;
}
